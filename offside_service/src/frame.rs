use offside_detector::Detection;
use serde::{Deserialize, Serialize};

/// Ground-contact point of a player: bottom-center of its box.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerPoint {
    pub x: i32,
    pub y: i32,
}

/// Center of the ball box.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BallPoint {
    pub x: i32,
    pub y: i32,
}

/// Everything the offside rule needs from one frame.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FramePoints {
    pub players: Vec<PlayerPoint>,
    pub ball: Option<BallPoint>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct ClassIds {
    #[serde(default = "default_player_class")]
    pub player_class_id: u32,
    #[serde(default = "default_ball_class")]
    pub ball_class_id: u32,
}

// COCO ids: `person` and `sports ball`.
fn default_player_class() -> u32 {
    0
}

fn default_ball_class() -> u32 {
    32
}

impl Default for ClassIds {
    fn default() -> Self {
        Self {
            player_class_id: default_player_class(),
            ball_class_id: default_ball_class(),
        }
    }
}

/// Box coordinates are truncated toward zero; midpoints round down.
fn midpoint(a: f32, b: f32) -> i32 {
    (a as i32 as i64 + b as i32 as i64).div_euclid(2) as i32
}

/// Reduces raw detections to player points and a single ball point.
///
/// When several balls are detected the most confident one wins, ties going to
/// the earliest detection. Detections of any other class are ignored.
pub fn interpret(detections: &[Detection], classes: &ClassIds) -> FramePoints {
    let mut players = Vec::new();
    let mut ball: Option<(f32, BallPoint)> = None;

    for detection in detections {
        let bbox = &detection.bbox;
        if detection.class_id == classes.player_class_id {
            players.push(PlayerPoint {
                x: midpoint(bbox.x1, bbox.x2),
                y: bbox.y2 as i32,
            });
        } else if detection.class_id == classes.ball_class_id {
            let point = BallPoint {
                x: midpoint(bbox.x1, bbox.x2),
                y: midpoint(bbox.y1, bbox.y2),
            };
            match ball {
                Some((confidence, _)) if confidence >= detection.confidence => {}
                _ => ball = Some((detection.confidence, point)),
            }
        }
    }

    FramePoints {
        players,
        ball: ball.map(|(_, point)| point),
    }
}
