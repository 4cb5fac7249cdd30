//! courier-core
//!
//! Core building blocks for the Courier outgoing-message queue.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, item, payload, window, source, errors）
//! - **ports**: 抽象化レイヤー（QueueStore, Directory, DeliverySink, Clock）
//! - **impls**: 実装（in-memory / SQLite / log・http sink）
//! - **app**: アプリケーションロジック（builder, producers, delivery, poll, supervisor）
//! - **config**: TOML + 環境変数による設定

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod ports;
