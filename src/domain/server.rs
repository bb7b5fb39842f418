use super::payment::PaymentStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Opaque, immutable identifier of a provisioned game server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServerId(Uuid);

impl ServerId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ServerId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for ServerId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl FromStr for ServerId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

impl fmt::Display for ServerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Games a server can be provisioned for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GameType {
    Minecraft,
    Valheim,
    Terraria,
    Factorio,
}

impl GameType {
    pub const ALL: [GameType; 4] = [
        GameType::Minecraft,
        GameType::Valheim,
        GameType::Terraria,
        GameType::Factorio,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            GameType::Minecraft => "minecraft",
            GameType::Valheim => "valheim",
            GameType::Terraria => "terraria",
            GameType::Factorio => "factorio",
        }
    }
}

impl FromStr for GameType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        GameType::ALL
            .into_iter()
            .find(|game| game.as_str() == s)
            .ok_or(())
    }
}

/// Datacenter regions servers can be placed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Region {
    Fra,
    Ams,
    Nyc,
    Sgp,
}

impl Region {
    pub const ALL: [Region; 4] = [Region::Fra, Region::Ams, Region::Nyc, Region::Sgp];

    pub fn as_str(&self) -> &'static str {
        match self {
            Region::Fra => "fra",
            Region::Ams => "ams",
            Region::Nyc => "nyc",
            Region::Sgp => "sgp",
        }
    }
}

impl FromStr for Region {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Region::ALL
            .into_iter()
            .find(|region| region.as_str() == s)
            .ok_or(())
    }
}

/// Package tier, restricted to 1..=3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct PackageTier(u8);

impl PackageTier {
    pub const MIN: u8 = 1;
    pub const MAX: u8 = 3;

    pub fn new(tier: u8) -> Option<Self> {
        (Self::MIN..=Self::MAX).contains(&tier).then_some(Self(tier))
    }

    pub fn value(&self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for PackageTier {
    type Error = String;

    fn try_from(tier: u8) -> Result<Self, Self::Error> {
        Self::new(tier).ok_or_else(|| format!("tier must be between 1 and 3, got {tier}"))
    }
}

impl From<PackageTier> for u8 {
    fn from(tier: PackageTier) -> Self {
        tier.0
    }
}

/// Lifecycle of a server: `installing` until its payment resolves.
///
/// `active` and `failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerStatus {
    Installing,
    Active,
    Failed,
}

impl ServerStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ServerStatus::Installing)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ServerStatus::Installing => "installing",
            ServerStatus::Active => "active",
            ServerStatus::Failed => "failed",
        }
    }
}

impl From<PaymentStatus> for ServerStatus {
    fn from(status: PaymentStatus) -> Self {
        match status {
            PaymentStatus::RequiresPaymentMethod => ServerStatus::Installing,
            PaymentStatus::Succeeded => ServerStatus::Active,
            PaymentStatus::Failed => ServerStatus::Failed,
        }
    }
}

impl fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A game server owned by a user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Server {
    pub id: ServerId,
    pub user_id: String,
    pub game: GameType,
    pub region: Region,
    pub tier: PackageTier,
    pub status: ServerStatus,
    pub created_at: DateTime<Utc>,
}

impl Server {
    /// Creates a fresh server record in the `installing` state.
    pub fn new(user_id: String, game: GameType, region: Region, tier: PackageTier) -> Self {
        Self {
            id: ServerId::new(),
            user_id,
            game,
            region,
            tier,
            status: ServerStatus::Installing,
            created_at: Utc::now(),
        }
    }
}
