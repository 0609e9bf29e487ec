//! Context addressing.
//!
//! Every isolated context is reachable under an address of the form
//! `"<contextName>@<numericTabId>"`, or just `"<contextName>"` for contexts
//! that are not bound to a tab (the background, a popup window).

use crate::common::{error::AddressError, types::BACKGROUND};
use core::{fmt, str::FromStr};
use serde::{Deserialize, Serialize};

/// Destination of a bridge message.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContextAddress {
    context: String,
    tab_id: Option<u64>,
}

impl ContextAddress {
    pub fn new(context: impl Into<String>, tab_id: u64) -> Self {
        Self {
            context: context.into(),
            tab_id: Some(tab_id),
        }
    }

    pub fn unbound(context: impl Into<String>) -> Self {
        Self {
            context: context.into(),
            tab_id: None,
        }
    }

    pub fn background() -> Self {
        Self::unbound(BACKGROUND)
    }

    pub fn context(&self) -> &str {
        &self.context
    }

    pub const fn tab_id(&self) -> Option<u64> {
        self.tab_id
    }

    pub fn is_background(&self) -> bool {
        self.tab_id.is_none() && self.context == BACKGROUND
    }
}

impl fmt::Display for ContextAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.tab_id {
            Some(tab_id) => write!(f, "{}@{tab_id}", self.context),
            None => f.write_str(&self.context),
        }
    }
}

impl FromStr for ContextAddress {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (context, tab_id) = match s.split_once('@') {
            Some((context, raw)) => {
                let tab_id = raw.parse::<u64>().map_err(|_| AddressError::InvalidTabId {
                    raw: raw.to_string(),
                })?;
                (context, Some(tab_id))
            }
            None => (s, None),
        };
        if context.is_empty() {
            return Err(AddressError::EmptyContext);
        }
        Ok(Self {
            context: context.to_string(),
            tab_id,
        })
    }
}

impl TryFrom<String> for ContextAddress {
    type Error = AddressError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ContextAddress> for String {
    fn from(value: ContextAddress) -> Self {
        value.to_string()
    }
}

/// Who sent a message, as reported by the transport.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SenderMeta {
    pub context: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tab_id: Option<u64>,
    /// URL of the page the sender is running in, if it has one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl SenderMeta {
    pub fn new(context: impl Into<String>, tab_id: Option<u64>) -> Self {
        Self {
            context: context.into(),
            tab_id,
            url: None,
        }
    }

    #[must_use]
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn background() -> Self {
        Self::new(BACKGROUND, None)
    }

    /// The address replies to this sender should go to.
    pub fn address(&self) -> ContextAddress {
        ContextAddress {
            context: self.context.clone(),
            tab_id: self.tab_id,
        }
    }
}

/// Predicate deciding which senders a subscription accepts.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum SenderFilter {
    #[default]
    Any,
    /// Only senders whose declared context equals this name.
    Context(String),
}

impl SenderFilter {
    pub fn context(name: impl Into<String>) -> Self {
        Self::Context(name.into())
    }

    pub fn matches(&self, sender: &SenderMeta) -> bool {
        match self {
            Self::Any => true,
            Self::Context(name) => sender.context == *name,
        }
    }
}
