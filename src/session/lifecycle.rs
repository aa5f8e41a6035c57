//! Per-connection session state machine
//!
//! ```text
//! INIT --upgrade--> AUTH --first hb/ack--> ACTIVE <--renew/renewed--> RENEW
//!   \________________\_______________________\__________________________\--> EVICT
//! ```
//!
//! EVICT is terminal for an instance; [`SessionLifecycle::reconnect`] starts a
//! new one. Tension forecasts eviction from inbound silence and token age and
//! is only ever advisory.

use super::types::{EvictReason, Phase, SessionConfig, SessionState, TransitionError};
use crate::auth::Token;
use chrono::{DateTime, Utc};

/// How a renewal in progress will complete
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenewalMode {
    /// `<renew/>` sent on the live socket, waiting for `<renewed/>`
    InPlace,
    /// Replacing the socket; the new socket's first ack completes it
    Reconnect,
}

/// Owner of one [`SessionState`]
#[derive(Debug, Clone)]
pub struct SessionLifecycle {
    config: SessionConfig,
    state: SessionState,
    renewal: Option<RenewalMode>,
}

impl SessionLifecycle {
    /// Start a session in INIT
    pub fn new(config: SessionConfig, now: DateTime<Utc>) -> Self {
        Self {
            config,
            state: SessionState::new(now),
            renewal: None,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn phase(&self) -> Phase {
        self.state.phase
    }

    pub fn tension(&self) -> f64 {
        self.state.tension_score
    }

    pub fn renewal_mode(&self) -> Option<RenewalMode> {
        self.renewal
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    fn transition(&mut self, to: Phase) -> Result<(), TransitionError> {
        let from = self.state.phase;
        if !from.can_transition_to(to) {
            return Err(TransitionError { from, to });
        }
        tracing::debug!(session_id = %self.state.session_id, %from, %to, "Session transition");
        self.state.phase = to;
        Ok(())
    }

    /// Install the token the connection was opened with
    pub fn authorize(&mut self, token: &Token) {
        self.state.auth_expiry = Some(token.expires_at);
        self.state.token_ttl_ms = token.ttl().num_milliseconds();
    }

    /// WebSocket upgrade accepted
    ///
    /// A session renewing through reconnect stays in RENEW.
    pub fn on_upgrade(&mut self, now: DateTime<Utc>) -> Result<(), TransitionError> {
        self.state.last_activity_at = now;
        if self.state.phase == Phase::Renew && self.renewal == Some(RenewalMode::Reconnect) {
            self.recompute(now);
            return Ok(());
        }
        self.transition(Phase::Auth)?;
        self.recompute(now);
        Ok(())
    }

    /// Any inbound traffic
    pub fn on_activity(&mut self, now: DateTime<Utc>) {
        if now > self.state.last_activity_at {
            self.state.last_activity_at = now;
        }
        self.recompute(now);
    }

    /// Heartbeat, pong or ack received
    ///
    /// Returns true when this ack made the session ACTIVE.
    pub fn on_ack(&mut self, now: DateTime<Utc>) -> Result<bool, TransitionError> {
        self.on_activity(now);
        match (self.state.phase, self.renewal) {
            (Phase::Auth, _) => {
                self.transition(Phase::Active)?;
                Ok(true)
            }
            (Phase::Renew, Some(RenewalMode::Reconnect)) => {
                self.transition(Phase::Active)?;
                self.renewal = None;
                self.recompute(now);
                Ok(true)
            }
            (Phase::Evict, _) => Err(TransitionError {
                from: Phase::Evict,
                to: Phase::Active,
            }),
            _ => Ok(false),
        }
    }

    /// Recompute tension at `now`
    pub fn recompute(&mut self, now: DateTime<Utc>) -> f64 {
        let liveness_ms = self.config.liveness_timeout.as_millis().max(1) as f64;
        let idle_ms = (now - self.state.last_activity_at).num_milliseconds().max(0) as f64;
        let activity_pressure = (idle_ms / liveness_ms).clamp(0.0, 1.0);

        let auth_pressure = match self.state.auth_expiry {
            Some(expiry) if self.state.token_ttl_ms > 0 => {
                let remaining_ms = (expiry - now).num_milliseconds() as f64;
                (1.0 - remaining_ms / self.state.token_ttl_ms as f64).clamp(0.0, 1.0)
            }
            _ => 0.0,
        };

        self.state.tension_score = activity_pressure.max(auth_pressure);
        self.state.tension_score
    }

    /// ACTIVE session at or over the high-water mark
    pub fn needs_renewal(&self) -> bool {
        self.state.phase == Phase::Active
            && self.state.tension_score >= self.config.high_water_mark
    }

    /// ACTIVE -> RENEW, starting an in-place renewal
    pub fn begin_renewal(&mut self) -> Result<(), TransitionError> {
        self.transition(Phase::Renew)?;
        self.renewal = Some(RenewalMode::InPlace);
        Ok(())
    }

    /// Switch the renewal in progress to a full reconnect
    pub fn renew_by_reconnect(&mut self) -> Result<(), TransitionError> {
        if self.state.phase != Phase::Renew {
            return Err(TransitionError {
                from: self.state.phase,
                to: Phase::Renew,
            });
        }
        self.renewal = Some(RenewalMode::Reconnect);
        Ok(())
    }

    /// RENEW -> ACTIVE with the new token accepted in place
    pub fn renewed(&mut self, token: &Token, now: DateTime<Utc>) -> Result<(), TransitionError> {
        self.transition(Phase::Active)?;
        self.renewal = None;
        self.authorize(token);
        self.state.last_activity_at = now;
        self.recompute(now);
        Ok(())
    }

    /// Any non-terminal phase -> EVICT
    pub fn evict(&mut self, reason: EvictReason) -> Result<(), TransitionError> {
        self.transition(Phase::Evict)?;
        tracing::info!(
            session_id = %self.state.session_id,
            reason = %reason,
            "Session evicted"
        );
        self.renewal = None;
        self.state.evict_reason = Some(reason);
        Ok(())
    }

    /// Replace an evicted session with a fresh INIT one
    pub fn reconnect(self, now: DateTime<Utc>) -> Result<SessionLifecycle, TransitionError> {
        if self.state.phase != Phase::Evict {
            return Err(TransitionError {
                from: self.state.phase,
                to: Phase::Init,
            });
        }
        Ok(SessionLifecycle::new(self.config, now))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use std::time::Duration;

    fn config() -> SessionConfig {
        SessionConfig {
            liveness_timeout: Duration::from_secs(10),
            high_water_mark: 0.7,
            ..Default::default()
        }
    }

    fn token_at(issued_at: DateTime<Utc>, ttl_secs: i64) -> Token {
        Token {
            value: "tok".to_string(),
            issued_at,
            expires_at: issued_at + ChronoDuration::seconds(ttl_secs),
        }
    }

    fn active_session(now: DateTime<Utc>) -> SessionLifecycle {
        let mut session = SessionLifecycle::new(config(), now);
        session.authorize(&token_at(now, 60));
        session.on_upgrade(now).unwrap();
        assert!(session.on_ack(now).unwrap());
        session
    }

    #[test]
    fn test_happy_path_to_active() {
        let now = Utc::now();
        let mut session = SessionLifecycle::new(config(), now);
        assert_eq!(session.phase(), Phase::Init);

        session.on_upgrade(now).unwrap();
        assert_eq!(session.phase(), Phase::Auth);

        assert!(session.on_ack(now).unwrap());
        assert_eq!(session.phase(), Phase::Active);

        // later acks don't transition again
        assert!(!session.on_ack(now).unwrap());
    }

    #[test]
    fn test_illegal_transition_rejected() {
        let now = Utc::now();
        let mut session = SessionLifecycle::new(config(), now);

        let err = session.begin_renewal().unwrap_err();
        assert_eq!(
            err,
            TransitionError {
                from: Phase::Init,
                to: Phase::Renew
            }
        );
        assert_eq!(session.phase(), Phase::Init);
    }

    #[test]
    fn test_tension_monotonic_without_activity() {
        let start = Utc::now();
        let mut session = active_session(start);

        let mut last = session.recompute(start);
        for secs in 1..=20 {
            let tension = session.recompute(start + ChronoDuration::seconds(secs));
            assert!(tension >= last, "tension fell at {secs}s");
            assert!((0.0..=1.0).contains(&tension));
            last = tension;
        }
        assert_eq!(last, 1.0);
    }

    #[test]
    fn test_auth_pressure_drives_tension() {
        let start = Utc::now();
        let mut session = active_session(start);

        // keep traffic flowing so only token age matters
        let at = start + ChronoDuration::seconds(45);
        session.on_activity(at);
        let tension = session.tension();
        assert!((tension - 0.75).abs() < 1e-9, "tension = {tension}");
        assert!(session.needs_renewal());
    }

    #[test]
    fn test_no_auth_pressure_without_token() {
        let start = Utc::now();
        let mut session = SessionLifecycle::new(config(), start);
        session.on_upgrade(start).unwrap();
        assert_eq!(session.recompute(start), 0.0);
    }

    #[test]
    fn test_renewal_drops_tension() {
        let start = Utc::now();
        let mut session = active_session(start);

        let late = start + ChronoDuration::seconds(50);
        session.on_activity(late);
        assert!(session.needs_renewal());
        let before = session.tension();

        session.begin_renewal().unwrap();
        assert_eq!(session.phase(), Phase::Renew);
        assert!(!session.needs_renewal());

        session.renewed(&token_at(late, 60), late).unwrap();
        assert_eq!(session.phase(), Phase::Active);
        assert!(session.tension() < before);
        assert_eq!(session.tension(), 0.0);
    }

    #[test]
    fn test_renew_active_cycles() {
        let start = Utc::now();
        let mut session = active_session(start);
        for i in 1..=5 {
            let now = start + ChronoDuration::seconds(i * 50);
            session.begin_renewal().unwrap();
            session.renewed(&token_at(now, 60), now).unwrap();
        }
        assert_eq!(session.phase(), Phase::Active);
    }

    #[test]
    fn test_renewal_by_reconnect_completes_on_first_ack() {
        let start = Utc::now();
        let mut session = active_session(start);
        let id = session.state().session_id;

        session.begin_renewal().unwrap();
        session.renew_by_reconnect().unwrap();

        // new socket: upgrade keeps RENEW, heartbeats alone don't
        let later = start + ChronoDuration::seconds(1);
        session.authorize(&token_at(later, 60));
        session.on_upgrade(later).unwrap();
        assert_eq!(session.phase(), Phase::Renew);

        assert!(session.on_ack(later).unwrap());
        assert_eq!(session.phase(), Phase::Active);
        assert_eq!(session.renewal_mode(), None);
        assert_eq!(session.state().session_id, id);
    }

    #[test]
    fn test_in_place_renewal_not_completed_by_ack() {
        let start = Utc::now();
        let mut session = active_session(start);
        session.begin_renewal().unwrap();

        assert!(!session.on_ack(start).unwrap());
        assert_eq!(session.phase(), Phase::Renew);
    }

    #[test]
    fn test_evict_is_terminal() {
        let now = Utc::now();
        let mut session = active_session(now);
        session.evict(EvictReason::LivenessTimeout).unwrap();

        assert_eq!(session.phase(), Phase::Evict);
        assert_eq!(
            session.state().evict_reason,
            Some(EvictReason::LivenessTimeout)
        );
        assert!(session.evict(EvictReason::RemoteClose).is_err());
        assert!(session.on_upgrade(now).is_err());
        assert!(session.on_ack(now).is_err());
    }

    #[test]
    fn test_reconnect_creates_new_session() {
        let now = Utc::now();
        let mut session = active_session(now);
        let old_id = session.state().session_id;

        session.evict(EvictReason::RemoteClose).unwrap();
        let fresh = session.reconnect(now).unwrap();

        assert_eq!(fresh.phase(), Phase::Init);
        assert_ne!(fresh.state().session_id, old_id);
        assert_eq!(fresh.state().evict_reason, None);
    }

    #[test]
    fn test_reconnect_requires_eviction() {
        let now = Utc::now();
        let session = active_session(now);
        let err = session.reconnect(now).unwrap_err();
        assert_eq!(err.from, Phase::Active);
        assert_eq!(err.to, Phase::Init);
    }
}
