//! Domain identifiers (strongly-typed IDs).
//!
//! すべての ID は外部の永続化層が払い出す整数（SQLite の rowid など）です。
//! Phantom type パターンで `Id<T>` に共通実装をまとめ、
//! `T` はコンパイル時の型安全性のためだけのマーカーとして使います。
//!
//! - QueueItemId と RecipientId は混同できない
//! - 実行時のサイズは i64 と同じ

use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;

/// IdMarker は各 ID 型のマーカー trait
///
/// Display で使うプレフィックス（"item-", "user-" など）を提供します。
pub trait IdMarker: Send + Sync + 'static {
    fn prefix() -> &'static str;
}

/// ジェネリック ID 型
///
/// Serialized transparently as the raw integer so wire documents stay plain.
#[repr(transparent)]
#[derive(Serialize, Deserialize)]
#[serde(transparent, bound = "")]
pub struct Id<T: IdMarker> {
    value: i64,
    #[serde(skip)]
    _marker: PhantomData<T>,
}

impl<T: IdMarker> Id<T> {
    pub const fn new(value: i64) -> Self {
        Self {
            value,
            _marker: PhantomData,
        }
    }

    pub const fn get(self) -> i64 {
        self.value
    }
}

// derive はマーカー型にも境界を要求するので手で実装する
impl<T: IdMarker> Clone for Id<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T: IdMarker> Copy for Id<T> {}

impl<T: IdMarker> PartialEq for Id<T> {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
    }
}

impl<T: IdMarker> Eq for Id<T> {}

impl<T: IdMarker> std::hash::Hash for Id<T> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.value.hash(state);
    }
}

impl<T: IdMarker> PartialOrd for Id<T> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<T: IdMarker> Ord for Id<T> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.value.cmp(&other.value)
    }
}

impl<T: IdMarker> From<i64> for Id<T> {
    fn from(value: i64) -> Self {
        Self::new(value)
    }
}

impl<T: IdMarker> fmt::Debug for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", T::prefix(), self.value)
    }
}

impl<T: IdMarker> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", T::prefix(), self.value)
    }
}

// ========================================
// マーカー型の定義
// ========================================

macro_rules! id_marker {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum $name {}

        impl IdMarker for $name {
            fn prefix() -> &'static str {
                $prefix
            }
        }
    };
}

id_marker!(
    /// Outgoing queue item のマーカー型
    Item, "item-"
);
id_marker!(
    /// Recipient (user / terminal device) のマーカー型
    User, "user-"
);
id_marker!(Class, "class-");
id_marker!(Window, "window-");
id_marker!(Memo, "memo-");
id_marker!(Quote, "quote-");

// ========================================
// Type Alias（使いやすさのため）
// ========================================

/// Identifier of a queue item (assigned by the store, monotonic).
pub type QueueItemId = Id<Item>;

/// Identifier of the consumer a queue item targets.
pub type RecipientId = Id<User>;

pub type ClassId = Id<Class>;

pub type WindowId = Id<Window>;

/// Identifier of a memo (reminder source).
pub type MemoId = Id<Memo>;

/// Identifier of a daily quote (broadcast source).
pub type QuoteId = Id<Quote>;
