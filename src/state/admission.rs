//! Admission and plausibility checks applied before a join, chat or movement is committed.

use std::time::Instant;

use crate::config::MovementRules;

/// Outcome of the movement plausibility check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MovementVerdict {
    /// Displacement fits within the allowed speed budget.
    Accepted,
    /// Displacement is large enough to be treated as a respawn or level change.
    Teleport,
    /// Displacement is neither plausible nor a teleport; positional fields are dropped.
    Rejected {
        /// Distance the client tried to cover.
        distance: f64,
        /// Distance allowed for the elapsed time.
        allowed: f64,
    },
}

impl MovementVerdict {
    /// Whether the positional fields of the update may be applied.
    pub fn accepts_position(&self) -> bool {
        !matches!(self, Self::Rejected { .. })
    }
}

/// Sanitize a requested display name.
///
/// Keeps ASCII letters, digits, spaces, `_` and `-`, trims surrounding whitespace and caps the
/// result at `max_len` characters. Returns `None` when nothing usable remains.
pub fn sanitize_name(raw: &str, max_len: usize) -> Option<String> {
    let filtered: String = raw
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, ' ' | '_' | '-'))
        .collect();
    let truncated: String = filtered.trim().chars().take(max_len).collect();
    let name = truncated.trim_end().to_string();
    (!name.is_empty()).then_some(name)
}

/// Key used to compare display names for uniqueness.
pub fn normalize_name(name: &str, case_insensitive: bool) -> String {
    if case_insensitive {
        name.to_ascii_lowercase()
    } else {
        name.to_string()
    }
}

/// Trim a chat message and cap it at `max_len` characters. Empty messages are dropped.
pub fn sanitize_chat(raw: &str, max_len: usize) -> Option<String> {
    let text: String = raw
        .trim()
        .chars()
        .filter(|c| !c.is_control())
        .take(max_len)
        .collect();
    (!text.is_empty()).then_some(text)
}

/// Decide whether moving from `previous` (seen at `previous_at`) to `next` (seen at `now`) is
/// plausible.
///
/// The speed budget never drops below one frame so that updates bunched together by the
/// network are not rejected for arriving "instantly".
pub fn check_movement(
    previous: (f64, f64),
    previous_at: Instant,
    next: (f64, f64),
    now: Instant,
    rules: &MovementRules,
) -> MovementVerdict {
    let distance = (next.0 - previous.0).hypot(next.1 - previous.1);
    if distance > rules.teleport_threshold {
        return MovementVerdict::Teleport;
    }

    let elapsed_ms = now.saturating_duration_since(previous_at).as_secs_f64() * 1000.0;
    let frames = (elapsed_ms / rules.frame_ms).max(1.0);
    let allowed = rules.max_speed * frames * rules.speed_tolerance;

    if distance <= allowed {
        MovementVerdict::Accepted
    } else {
        MovementVerdict::Rejected { distance, allowed }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn rules() -> MovementRules {
        MovementRules {
            max_speed: 12.0,
            frame_ms: 16.0,
            speed_tolerance: 1.5,
            teleport_threshold: 500.0,
        }
    }

    #[test]
    fn sanitize_name_filters_trims_and_truncates() {
        assert_eq!(sanitize_name("  Alice  ", 15), Some("Alice".into()));
        assert_eq!(sanitize_name("<b>Bob</b>!", 15), Some("bBobb".into()));
        assert_eq!(
            sanitize_name("abcdefghijklmnopqrstuvwxyz", 12),
            Some("abcdefghijkl".into())
        );
        assert_eq!(sanitize_name("ab           cd", 4), Some("ab".into()));
        assert_eq!(sanitize_name("@@@", 15), None);
        assert_eq!(sanitize_name("   ", 15), None);
    }

    #[test]
    fn normalize_name_respects_policy() {
        assert_eq!(normalize_name("Alice", true), "alice");
        assert_eq!(normalize_name("Alice", false), "Alice");
    }

    #[test]
    fn sanitize_chat_truncates_and_drops_empty() {
        assert_eq!(sanitize_chat(" hi ", 140), Some("hi".into()));
        assert_eq!(sanitize_chat(&"x".repeat(500), 100).map(|t| t.len()), Some(100));
        assert_eq!(sanitize_chat("\n\t ", 100), None);
    }

    #[test]
    fn large_jump_is_accepted_as_teleport() {
        let t0 = Instant::now();
        let verdict = check_movement(
            (0.0, 0.0),
            t0,
            (1000.0, 1000.0),
            t0 + Duration::from_millis(16),
            &rules(),
        );
        assert_eq!(verdict, MovementVerdict::Teleport);
        assert!(verdict.accepts_position());
    }

    #[test]
    fn implausible_jump_below_teleport_threshold_is_rejected() {
        let t0 = Instant::now();
        let verdict = check_movement(
            (0.0, 0.0),
            t0,
            (100.0, 0.0),
            t0 + Duration::from_millis(16),
            &rules(),
        );
        assert!(matches!(verdict, MovementVerdict::Rejected { .. }));
        assert!(!verdict.accepts_position());
    }

    #[test]
    fn movement_within_speed_budget_is_accepted() {
        let t0 = Instant::now();
        let verdict = check_movement(
            (0.0, 0.0),
            t0,
            (30.0, 40.0),
            t0 + Duration::from_millis(64),
            &rules(),
        );
        assert_eq!(verdict, MovementVerdict::Accepted);
    }

    #[test]
    fn bunched_updates_get_one_frame_of_budget() {
        let t0 = Instant::now();
        assert_eq!(
            check_movement((0.0, 0.0), t0, (10.0, 0.0), t0, &rules()),
            MovementVerdict::Accepted
        );
    }
}
