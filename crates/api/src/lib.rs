pub mod client;
pub mod types;

pub use {
    client::{ApiClient, ApiError},
    types::{Customer, ListMatchesResponse, MatchItem, MatchStatus, Problem},
};
