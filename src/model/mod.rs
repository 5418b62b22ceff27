// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

mod level_id;
mod message;
mod product_store;
mod store_cache;

pub use level_id::{LevelId, JOB_LEVEL};
pub use message::{FlushOrigin, FlushToken, Message, TicketRegistry};
pub use product_store::{ErasedProduct, ProductStore};
pub use store_cache::StoreCache;
