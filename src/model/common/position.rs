use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A position that can be announced and applied for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Position {
    Ceo,
    Cto,
    Cfo,
    Coo,
    Manager,
    TeamLead,
    SeniorDeveloper,
    Developer,
    HrManager,
    MarketingHead,
    SalesManager,
    ProductManager,
    OperationsManager,
    FinanceManager,
}

impl Position {
    pub const ALL: [Position; 14] = [
        Self::Ceo,
        Self::Cto,
        Self::Cfo,
        Self::Coo,
        Self::Manager,
        Self::TeamLead,
        Self::SeniorDeveloper,
        Self::Developer,
        Self::HrManager,
        Self::MarketingHead,
        Self::SalesManager,
        Self::ProductManager,
        Self::OperationsManager,
        Self::FinanceManager,
    ];

    /// The display title, which is also the stored and hashed form.
    pub fn title(self) -> &'static str {
        match self {
            Self::Ceo => "CEO",
            Self::Cto => "CTO",
            Self::Cfo => "CFO",
            Self::Coo => "COO",
            Self::Manager => "Manager",
            Self::TeamLead => "Team Lead",
            Self::SeniorDeveloper => "Senior Developer",
            Self::Developer => "Developer",
            Self::HrManager => "HR Manager",
            Self::MarketingHead => "Marketing Head",
            Self::SalesManager => "Sales Manager",
            Self::ProductManager => "Product Manager",
            Self::OperationsManager => "Operations Manager",
            Self::FinanceManager => "Finance Manager",
        }
    }
}

impl Display for Position {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.title())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("Invalid position: {0}")]
pub struct UnknownPosition(pub String);

impl FromStr for Position {
    type Err = UnknownPosition;

    /// Titles match ignoring case and surrounding whitespace.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Self::ALL
            .into_iter()
            .find(|p| p.title().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| UnknownPosition(wanted.to_string()))
    }
}

impl TryFrom<String> for Position {
    type Error = UnknownPosition;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Position> for String {
    fn from(position: Position) -> Self {
        position.title().to_string()
    }
}
