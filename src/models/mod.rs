pub mod booking;
pub mod review;
pub mod tour;
pub mod user;

use crate::engine::Store;
use crate::errors::DbError;
use crate::model::Model;

pub use booking::Booking;
pub use review::{calc_average_ratings, Review};
pub use tour::{slugify, Location, Tour};
pub use user::User;

/// Defines every collection and registers every lifecycle hook on `store`.
pub fn register_all(store: &Store) -> Result<(), DbError> {
    User::install(store)?;
    Tour::install(store)?;
    Review::install(store)?;
    Booking::install(store)?;
    log::debug!("models installed: {:?}", store.collection_names());
    Ok(())
}
