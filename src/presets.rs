//! Endpoint policy presets.
//!
//! [`chat_bot`] is the table used by a conversational ordering bot, where every
//! inbound message maps to one of a handful of categories:
//!
//! | endpoint  | requests | window | block |
//! |-----------|----------|--------|-------|
//! | `start`   | 5        | 60 s   | 60 s  |
//! | `menu`    | 20       | 60 s   | 60 s  |
//! | `cart`    | 15       | 60 s   | 60 s  |
//! | `order`   | 3        | 300 s  | 60 s  |
//! | `admin`   | 10       | 60 s   | 60 s  |
//! | `general` | 30       | 60 s   | 60 s  |
//!
//! ```rust
//! use gatehouse::{presets, AdmissionController};
//!
//! let controller = AdmissionController::builder().policies(presets::chat_bot()).build();
//! assert_eq!(controller.policy("order").max_requests(), 3);
//! ```

use crate::policy::RateLimitPolicy;

const DEFAULT_BLOCK_SECS: u64 = 60;

pub const START: RateLimitPolicy = RateLimitPolicy::preset(5, 60, DEFAULT_BLOCK_SECS);
pub const MENU: RateLimitPolicy = RateLimitPolicy::preset(20, 60, DEFAULT_BLOCK_SECS);
pub const CART: RateLimitPolicy = RateLimitPolicy::preset(15, 60, DEFAULT_BLOCK_SECS);
pub const ORDER: RateLimitPolicy = RateLimitPolicy::preset(3, 300, DEFAULT_BLOCK_SECS);
pub const ADMIN: RateLimitPolicy = RateLimitPolicy::preset(10, 60, DEFAULT_BLOCK_SECS);
pub const GENERAL: RateLimitPolicy = RateLimitPolicy::preset(30, 60, DEFAULT_BLOCK_SECS);

/// Chat-bot endpoint table.
pub fn chat_bot() -> [(&'static str, RateLimitPolicy); 6] {
    [
        ("start", START),
        ("menu", MENU),
        ("cart", CART),
        ("order", ORDER),
        ("admin", ADMIN),
        ("general", GENERAL),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets_pass_validation() {
        for (endpoint, policy) in chat_bot() {
            let checked = RateLimitPolicy::new(
                policy.max_requests(),
                policy.window_secs(),
                policy.block_duration_secs(),
            );
            assert_eq!(checked, Ok(policy), "{endpoint} preset must be valid");
        }
    }

    #[test]
    fn order_is_the_strictest() {
        let order_rate = ORDER.max_requests() as f64 / ORDER.window_secs() as f64;
        for (endpoint, policy) in chat_bot() {
            let rate = policy.max_requests() as f64 / policy.window_secs() as f64;
            assert!(order_rate <= rate, "{endpoint} should not be stricter than order");
        }
    }
}
