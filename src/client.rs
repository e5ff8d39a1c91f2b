use crate::http::{FetchGate, FetchOutcome};
use crate::model::{projection, Board, Envelope, Pin, User, BOARD_FIELDS, PIN_FIELDS, USER_FIELDS};
use crate::page::{Page, RawPage};
use log::{debug, warn};
use serde::de::DeserializeOwned;
use std::sync::Arc;

pub const MAX_PAGE_SIZE: u32 = 100;
pub const DEFAULT_PAGE_SIZE: u32 = 25;

/// Which board to list pins for, resolved at the call site.
#[derive(Debug, Clone, Copy)]
pub enum BoardRef<'a> {
    Id(&'a str),
    Board(&'a Board),
}

impl<'a> BoardRef<'a> {
    pub fn id(&self) -> Option<&'a str> {
        match *self {
            BoardRef::Id(id) => Some(id),
            BoardRef::Board(board) => board.id.as_deref(),
        }
    }
}

impl<'a> From<&'a Board> for BoardRef<'a> {
    fn from(board: &'a Board) -> Self {
        BoardRef::Board(board)
    }
}

impl<'a> From<&'a str> for BoardRef<'a> {
    fn from(id: &'a str) -> Self {
        BoardRef::Id(id)
    }
}

/// Typed Pinterest operations layered on one [`FetchGate`].
#[derive(Debug, Clone)]
pub struct Client {
    gate: Arc<FetchGate>,
    api_url: String,
}

impl Client {
    pub fn new(gate: Arc<FetchGate>, api_url: impl Into<String>) -> Self {
        Self {
            gate,
            api_url: api_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn gate(&self) -> &FetchGate {
        &self.gate
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.api_url, path)
    }

    async fn get_entity<T: DeserializeOwned>(&self, path: &str, fields: &[&str]) -> Option<T> {
        let query = [("fields", projection(fields))];
        match self
            .gate
            .get_json::<Envelope<T>>(&self.endpoint(path), &query)
            .await
        {
            FetchOutcome::Data(env) => env.data,
            FetchOutcome::Empty => {
                debug!("{} returned no data", path);
                None
            }
            FetchOutcome::Failed(err) => {
                warn!("{} unavailable: {}", path, err.code);
                None
            }
        }
    }

    async fn get_page<T: DeserializeOwned>(
        &self,
        path: &str,
        fields: &[&str],
        limit: Option<u32>,
    ) -> Page<T> {
        let limit = limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
        let query = [
            ("fields", projection(fields)),
            ("limit", limit.to_string()),
        ];
        let outcome = self
            .gate
            .get_json::<RawPage>(&self.endpoint(path), &query)
            .await;
        if let FetchOutcome::Failed(err) = &outcome {
            warn!("{} unavailable: {}", path, err.code);
        }
        Page::from_outcome(outcome)
    }

    /// The authenticated user.
    pub async fn get_user(&self) -> Option<User> {
        self.get_entity("/me/", USER_FIELDS).await
    }

    /// First page of the authenticated user's boards.
    pub async fn get_boards(&self, limit: Option<u32>) -> Page<Board> {
        self.get_page("/me/boards/", BOARD_FIELDS, limit).await
    }

    /// First page of a board's pins. A board without an id has no pins to list.
    pub async fn get_pins(&self, board: BoardRef<'_>, limit: Option<u32>) -> Page<Pin> {
        let Some(id) = board.id() else {
            warn!("Cannot list pins for a board without an id");
            return Page::default();
        };
        let path = format!("/boards/{}/pins/", urlencoding::encode(id));
        self.get_page(&path, PIN_FIELDS, limit).await
    }

    pub async fn get_board(&self, id: &str) -> Option<Board> {
        let path = format!("/boards/{}/", urlencoding::encode(id));
        self.get_entity(&path, BOARD_FIELDS).await
    }

    pub async fn get_pin(&self, id: &str) -> Option<Pin> {
        let path = format!("/pins/{}/", urlencoding::encode(id));
        self.get_entity(&path, PIN_FIELDS).await
    }

    pub async fn get_all_boards(&self) -> Vec<Board> {
        self.get_boards(Some(MAX_PAGE_SIZE))
            .await
            .drain(&self.gate)
            .await
    }

    pub async fn get_all_pins(&self, board: BoardRef<'_>) -> Vec<Pin> {
        self.get_pins(board, Some(MAX_PAGE_SIZE))
            .await
            .drain(&self.gate)
            .await
    }
}
