//! Ball physics and court geometry
//!
//! All distances are logical court units and all velocities are units per tick.
//! The browser renderer draws with the same numbers, so none of these may drift.

use crate::ws::protocol::Side;

/// Court width
pub const COURT_WIDTH: f64 = 800.0;
/// Court height
pub const COURT_HEIGHT: f64 = 600.0;
/// Paddle height; a paddle covers `y..=y + PADDLE_HEIGHT`
pub const PADDLE_HEIGHT: f64 = 100.0;
/// Paddle top at kickoff, centering both paddles
pub const INITIAL_PADDLE_Y: f64 = (COURT_HEIGHT - PADDLE_HEIGHT) / 2.0;
/// Serve speed on each axis
pub const BALL_BASE_SPEED: f64 = 5.0;
/// Horizontal speed multiplier applied on every paddle hit (compounds per rally)
pub const PADDLE_SPEEDUP: f64 = 1.1;
/// First side to reach this score wins
pub const WIN_SCORE: u32 = 11;

/// Horizontal strip in which a paddle can touch the ball (inclusive)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PaddleBand {
    pub min_x: f64,
    pub max_x: f64,
}

impl PaddleBand {
    pub fn for_side(side: Side) -> Self {
        match side {
            Side::Left => LEFT_PADDLE_BAND,
            Side::Right => RIGHT_PADDLE_BAND,
        }
    }

    pub fn contains(&self, x: f64) -> bool {
        x >= self.min_x && x <= self.max_x
    }
}

pub const LEFT_PADDLE_BAND: PaddleBand = PaddleBand { min_x: 40.0, max_x: 60.0 };
pub const RIGHT_PADDLE_BAND: PaddleBand = PaddleBand { min_x: 740.0, max_x: 760.0 };

/// Ball position and velocity. Velocity never leaves the server.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ball {
    pub x: f64,
    pub y: f64,
    pub dx: f64,
    pub dy: f64,
}

impl Ball {
    /// Kickoff ball: center court, heading down and to the right
    pub fn kickoff() -> Self {
        Self {
            x: COURT_WIDTH / 2.0,
            y: COURT_HEIGHT / 2.0,
            dx: BALL_BASE_SPEED,
            dy: BALL_BASE_SPEED,
        }
    }

    /// Put the ball back at center court and serve it toward `toward` at base speed.
    /// Vertical velocity carries over.
    pub fn recenter(&mut self, toward: Side) {
        self.x = COURT_WIDTH / 2.0;
        self.y = COURT_HEIGHT / 2.0;
        self.dx = match toward {
            Side::Left => -BALL_BASE_SPEED,
            Side::Right => BALL_BASE_SPEED,
        };
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.dx.is_finite() && self.dy.is_finite()
    }
}

/// Stateless collision and movement rules
pub struct PhysicsSystem;

impl PhysicsSystem {
    /// Advance the ball by one tick of velocity
    pub fn integrate(ball: &mut Ball) {
        ball.x += ball.dx;
        ball.y += ball.dy;
    }

    /// Flip vertical velocity on touching the top or bottom wall.
    /// Returns true if the ball bounced.
    pub fn reflect_walls(ball: &mut Ball) -> bool {
        if ball.y <= 0.0 || ball.y >= COURT_HEIGHT {
            ball.dy = -ball.dy;
            true
        } else {
            false
        }
    }

    /// Whether the ball is inside `band` and within the paddle's vertical extent
    pub fn paddle_contact(ball: &Ball, band: PaddleBand, paddle_y: f64) -> bool {
        band.contains(ball.x) && ball.y >= paddle_y && ball.y <= paddle_y + PADDLE_HEIGHT
    }

    /// Reverse and amplify horizontal velocity for each paddle the ball touches.
    /// Left is tested before right; the bands are disjoint so at most one hits.
    pub fn resolve_paddles(ball: &mut Ball, left_paddle_y: f64, right_paddle_y: f64) -> Option<Side> {
        let mut hit = None;
        for (side, paddle_y) in [(Side::Left, left_paddle_y), (Side::Right, right_paddle_y)] {
            if Self::paddle_contact(ball, PaddleBand::for_side(side), paddle_y) {
                ball.dx *= -PADDLE_SPEEDUP;
                hit = Some(side);
            }
        }
        hit
    }

    /// The side that scores if the ball has left the court horizontally
    pub fn scoring_side(ball: &Ball) -> Option<Side> {
        if ball.x <= 0.0 {
            Some(Side::Right)
        } else if ball.x >= COURT_WIDTH {
            Some(Side::Left)
        } else {
            None
        }
    }
}
