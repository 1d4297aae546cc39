//! Offside heuristic over one frame.
//!
//! Image coordinates are used as-is: a smaller `y` is further up the field and
//! attacks are assumed to run toward increasing `x`. Players are not split by
//! team, so the "second-last defender" is simply the second-deepest of all
//! detected players. This is a known limitation, not a rules-accurate call.

use crate::frame::{BallPoint, PlayerPoint};
use serde::{Serialize, Serializer};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsufficientData {
    NoPlayersOrBall,
    FewerThanTwoPlayers,
}

impl fmt::Display for InsufficientData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InsufficientData::NoPlayersOrBall => write!(f, "no players or ball detected"),
            InsufficientData::FewerThanTwoPlayers => write!(f, "fewer than two players detected"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Offside,
    NotOffside,
    InsufficientData(InsufficientData),
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Offside => "offside",
            Verdict::NotOffside => "not_offside",
            Verdict::InsufficientData(_) => "insufficient_data",
        }
    }
}

/// `true`, `false`, or the reason the frame could not be judged.
impl Serialize for Verdict {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Verdict::Offside => serializer.serialize_bool(true),
            Verdict::NotOffside => serializer.serialize_bool(false),
            Verdict::InsufficientData(reason) => serializer.collect_str(reason),
        }
    }
}

pub fn evaluate(players: &[PlayerPoint], ball: Option<BallPoint>) -> Verdict {
    let ball = match ball {
        Some(ball) if !players.is_empty() => ball,
        _ => return Verdict::InsufficientData(InsufficientData::NoPlayersOrBall),
    };

    if players.len() < 2 {
        return Verdict::InsufficientData(InsufficientData::FewerThanTwoPlayers);
    }

    let mut by_depth = players.to_vec();
    by_depth.sort_by_key(|player| player.y);
    let second_last_defender = by_depth[by_depth.len() - 2];

    let offside = players
        .iter()
        .any(|player| player.y < second_last_defender.y && player.x > ball.x);

    if offside {
        Verdict::Offside
    } else {
        Verdict::NotOffside
    }
}
