//! Relay-style cursor pagination.
//!
//! A request's `{first, after, last, before}` is resolved once into a
//! [`ResolvedPaging`]: a direction, an optional decoded cursor and a count.
//! Storage then fetches `count + 1` rows and [`connection_from_rows`] turns
//! them into a [`Connection`], using the extra row only to detect whether
//! another page exists.

use crate::{error::Result, Error};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};

/// Page size used when the request has no count.
pub const DEFAULT_PAGE_SIZE: usize = 25;

/// Raw paging parameters from a request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Paging {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before: Option<String>,
}

impl Paging {
    pub fn first(count: usize) -> Self {
        Self {
            first: Some(count),
            ..Self::default()
        }
    }

    pub fn last(count: usize) -> Self {
        Self {
            last: Some(count),
            ..Self::default()
        }
    }

    pub fn after(mut self, cursor: impl Into<String>) -> Self {
        self.after = Some(cursor.into());
        self
    }

    pub fn before(mut self, cursor: impl Into<String>) -> Self {
        self.before = Some(cursor.into());
        self
    }
}

/// Type of the key a cursor encodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorKind {
    Int,
    String,
}

/// A decoded cursor: a position in the ordered key space.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CursorKey {
    Int(i64),
    String(String),
}

impl CursorKey {
    pub fn kind(&self) -> CursorKind {
        match self {
            CursorKey::Int(_) => CursorKind::Int,
            CursorKey::String(_) => CursorKind::String,
        }
    }
}

/// Encode a key as an opaque cursor.
pub fn to_opaque_cursor(key: &CursorKey) -> String {
    match key {
        CursorKey::Int(value) => BASE64.encode(value.to_string()),
        CursorKey::String(value) => BASE64.encode(value),
    }
}

/// Decode an opaque cursor into a key of the expected kind.
pub fn from_opaque_cursor(kind: CursorKind, cursor: &str) -> Result<CursorKey> {
    let invalid = || Error::bad_request("Invalid format for request cursor");
    let bytes = BASE64.decode(cursor).map_err(|_| invalid())?;
    let text = String::from_utf8(bytes).map_err(|_| invalid())?;
    match kind {
        CursorKind::Int => text.parse().map(CursorKey::Int).map_err(|_| invalid()),
        CursorKind::String => Ok(CursorKey::String(text)),
    }
}

/// Paging resolved into a directional, bounded fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPaging {
    pub is_forwards: bool,
    pub cursor: Option<CursorKey>,
    pub count: usize,
}

impl ResolvedPaging {
    /// Number of rows to fetch: one more than the page, to detect more pages.
    pub fn fetch_limit(&self) -> usize {
        self.count.saturating_add(1)
    }
}

/// Resolve raw paging parameters.
///
/// Forwards whenever `first` or `after` is given, or when nothing is given;
/// backwards only for `last`/`before` without a forwards key.
pub fn resolve_paging(paging: &Paging, kind: CursorKind) -> Result<ResolvedPaging> {
    let backwards_requested = paging.last.is_some() || paging.before.is_some();
    let forwards_requested = paging.first.is_some() || paging.after.is_some();
    let is_forwards = forwards_requested || !backwards_requested;

    let (count, cursor) = if is_forwards {
        (paging.first, paging.after.as_deref())
    } else {
        (paging.last, paging.before.as_deref())
    };
    let cursor = cursor
        .map(|cursor| from_opaque_cursor(kind, cursor))
        .transpose()?;

    Ok(ResolvedPaging {
        is_forwards,
        cursor,
        count: count.unwrap_or(DEFAULT_PAGE_SIZE),
    })
}

/// Page boundaries of a connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    pub has_previous_page: bool,
    pub has_next_page: bool,
    pub start_cursor: String,
    pub end_cursor: String,
}

/// A node with its cursor. Nodes that fail to decode carry the error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge<T> {
    pub node: Result<T>,
    pub cursor: String,
}

/// A page of results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connection<T> {
    pub edges: Vec<Edge<T>>,
    pub page_info: PageInfo,
}

impl<T> Connection<T> {
    /// Successfully decoded nodes, in page order.
    pub fn nodes(&self) -> impl Iterator<Item = &T> {
        self.edges.iter().filter_map(|edge| edge.node.as_ref().ok())
    }
}

/// Build a connection from at most `count + 1` rows in fetch order.
///
/// Returns `None` for an empty page (including `count == 0`). Backward pages
/// are reversed into forward order.
pub fn connection_from_rows<R, T>(
    paging: &ResolvedPaging,
    mut rows: Vec<R>,
    cursor_of: impl Fn(&R) -> CursorKey,
    mut node_of: impl FnMut(R) -> Result<T>,
) -> Option<Connection<T>> {
    if paging.count == 0 {
        return None;
    }
    let has_more = rows.len() > paging.count;
    rows.truncate(paging.count);
    if !paging.is_forwards {
        rows.reverse();
    }

    let edges: Vec<Edge<T>> = rows
        .into_iter()
        .map(|row| {
            let cursor = to_opaque_cursor(&cursor_of(&row));
            Edge {
                node: node_of(row),
                cursor,
            }
        })
        .collect();

    let start_cursor = edges.first()?.cursor.clone();
    let end_cursor = edges.last()?.cursor.clone();
    Some(Connection {
        edges,
        page_info: PageInfo {
            has_previous_page: !paging.is_forwards && has_more,
            has_next_page: paging.is_forwards && has_more,
            start_cursor,
            end_cursor,
        },
    })
}
