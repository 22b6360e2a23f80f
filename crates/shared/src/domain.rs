use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

id_newtype!(UserId);
id_newtype!(TeamId);
id_newtype!(ChannelId);
id_newtype!(ChatId);
id_newtype!(MessageId);

/// The conversation a user has selected. A new selection replaces the old
/// one wholesale; nothing is merged across selections.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConversationRef {
    Channel {
        team_id: TeamId,
        channel_id: ChannelId,
        name: String,
    },
    Chat {
        chat_id: ChatId,
        name: String,
    },
}

impl ConversationRef {
    pub fn channel(
        team_id: impl Into<TeamId>,
        channel_id: impl Into<ChannelId>,
        name: impl Into<String>,
    ) -> Self {
        Self::Channel {
            team_id: team_id.into(),
            channel_id: channel_id.into(),
            name: name.into(),
        }
    }

    pub fn chat(chat_id: impl Into<ChatId>, name: impl Into<String>) -> Self {
        Self::Chat {
            chat_id: chat_id.into(),
            name: name.into(),
        }
    }

    pub fn key(&self) -> ConversationKey {
        match self {
            Self::Channel {
                team_id,
                channel_id,
                ..
            } => ConversationKey::Channel {
                team_id: team_id.clone(),
                channel_id: channel_id.clone(),
            },
            Self::Chat { chat_id, .. } => ConversationKey::Chat(chat_id.clone()),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Channel { name, .. } | Self::Chat { name, .. } => name,
        }
    }

    pub fn is_channel(&self) -> bool {
        matches!(self, Self::Channel { .. })
    }
}

/// Identity of a conversation without its display name. Used to decide
/// whether an asynchronous result still belongs to the current selection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ConversationKey {
    Channel {
        team_id: TeamId,
        channel_id: ChannelId,
    },
    Chat(ChatId),
}

impl fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Channel {
                team_id,
                channel_id,
            } => write!(f, "channel:{team_id}/{channel_id}"),
            Self::Chat(chat_id) => write!(f, "chat:{chat_id}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Availability {
    Available,
    AvailableIdle,
    Away,
    BeRightBack,
    Busy,
    BusyIdle,
    DoNotDisturb,
    Offline,
    #[default]
    #[serde(rename = "PresenceUnknown", other)]
    Unknown,
}

impl Availability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Available => "Available",
            Self::AvailableIdle => "AvailableIdle",
            Self::Away => "Away",
            Self::BeRightBack => "BeRightBack",
            Self::Busy => "Busy",
            Self::BusyIdle => "BusyIdle",
            Self::DoNotDisturb => "DoNotDisturb",
            Self::Offline => "Offline",
            Self::Unknown => "PresenceUnknown",
        }
    }
}

impl std::str::FromStr for Availability {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let parsed = match value.to_ascii_lowercase().as_str() {
            "available" => Self::Available,
            "availableidle" => Self::AvailableIdle,
            "away" => Self::Away,
            "berightback" => Self::BeRightBack,
            "busy" => Self::Busy,
            "busyidle" => Self::BusyIdle,
            "donotdisturb" => Self::DoNotDisturb,
            "offline" => Self::Offline,
            "presenceunknown" | "unknown" => Self::Unknown,
            other => return Err(format!("unknown availability: {other}")),
        };
        Ok(parsed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum ChatType {
    OneOnOne,
    Group,
    Meeting,
    #[default]
    #[serde(other)]
    Unknown,
}
