//! Strategy, scene and consumption status enums

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How the idempotency key of a guarded call is derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IdempotentType {
    /// Single-use pre-issued token.
    Token,
    /// Fingerprint of path, user and arguments.
    #[default]
    Param,
    /// Key evaluated from a template against the arguments.
    Spel,
}

impl fmt::Display for IdempotentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            IdempotentType::Token => "TOKEN",
            IdempotentType::Param => "PARAM",
            IdempotentType::Spel => "SPEL",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for IdempotentType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "TOKEN" => Ok(IdempotentType::Token),
            "PARAM" => Ok(IdempotentType::Param),
            "SPEL" | "EXPRESSION" => Ok(IdempotentType::Spel),
            other => Err(format!("unknown idempotent type: {}", other)),
        }
    }
}

/// Where the guarded call originates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IdempotentScene {
    /// Synchronous REST request.
    #[default]
    RestApi,
    /// Asynchronous message consumption.
    Mq,
}

impl fmt::Display for IdempotentScene {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            IdempotentScene::RestApi => "RESTAPI",
            IdempotentScene::Mq => "MQ",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for IdempotentScene {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "RESTAPI" | "REST" => Ok(IdempotentScene::RestApi),
            "MQ" => Ok(IdempotentScene::Mq),
            other => Err(format!("unknown idempotent scene: {}", other)),
        }
    }
}

/// Status stored in the message dedup record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConsumeStatus {
    /// First delivery claimed the key and is still processing.
    Consuming,
    /// Processing finished successfully.
    Consumed,
}

impl ConsumeStatus {
    /// Stored representation.
    pub fn code(&self) -> &'static str {
        match self {
            ConsumeStatus::Consuming => "0",
            ConsumeStatus::Consumed => "1",
        }
    }

    /// Parse the stored representation. Unknown values read as `Consumed`
    /// so a corrupted record never triggers endless redelivery.
    pub fn from_code(code: &str) -> Self {
        if code == "0" {
            ConsumeStatus::Consuming
        } else {
            ConsumeStatus::Consumed
        }
    }

    /// A repeat delivery observing this status should be retried later.
    pub fn is_error(&self) -> bool {
        matches!(self, ConsumeStatus::Consuming)
    }
}

impl fmt::Display for ConsumeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConsumeStatus::Consuming => write!(f, "CONSUMING"),
            ConsumeStatus::Consumed => write!(f, "CONSUMED"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_consume_status_codes() {
        assert_eq!(ConsumeStatus::Consuming.code(), "0");
        assert_eq!(ConsumeStatus::Consumed.code(), "1");
        assert_eq!(ConsumeStatus::from_code("0"), ConsumeStatus::Consuming);
        assert_eq!(ConsumeStatus::from_code("1"), ConsumeStatus::Consumed);
        assert!(ConsumeStatus::Consuming.is_error());
        assert!(!ConsumeStatus::Consumed.is_error());
    }

    #[test]
    fn test_parse_type_and_scene() {
        assert_eq!("token".parse::<IdempotentType>(), Ok(IdempotentType::Token));
        assert_eq!("SpEL".parse::<IdempotentType>(), Ok(IdempotentType::Spel));
        assert!("nope".parse::<IdempotentType>().is_err());
        assert_eq!("mq".parse::<IdempotentScene>(), Ok(IdempotentScene::Mq));
        assert_eq!(
            "RestApi".parse::<IdempotentScene>(),
            Ok(IdempotentScene::RestApi)
        );
    }

    #[test]
    fn test_defaults() {
        assert_eq!(IdempotentType::default(), IdempotentType::Param);
        assert_eq!(IdempotentScene::default(), IdempotentScene::RestApi);
    }
}
