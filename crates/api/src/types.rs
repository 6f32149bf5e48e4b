use serde::{Deserialize, Serialize};

/// RFC 7807 problem document the API returns on errors.
#[derive(Debug, Clone, Deserialize)]
pub struct Problem {
    #[serde(default, rename = "type")]
    pub kind: String,
    pub title: String,
    #[serde(default)]
    pub status: Option<u16>,
    #[serde(default)]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Customer {
    pub id: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchStatus {
    Pending,
    Merged,
    Ignored,
}

impl MatchStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Merged => "merged",
            Self::Ignored => "ignored",
        }
    }
}

/// A suspected duplicate pair, optionally expanded with both customer records.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchItem {
    pub id: String,
    pub score: f64,
    pub status: MatchStatus,
    pub customer_a_id: String,
    pub customer_b_id: String,
    #[serde(default)]
    pub customer_a: Option<Customer>,
    #[serde(default)]
    pub customer_b: Option<Customer>,
}

#[derive(Debug, Deserialize)]
pub struct ListMatchesResponse {
    pub items: Vec<MatchItem>,
}
