// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Signing session state, tracking the hashing passes issued to the device

use log::debug;

use crate::Error;

/// Signing session state
///
/// Indices refer to the position of the input descriptor being signed.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum SessionState {
    /// No hashing passes issued
    NotStarted,
    /// Witness priming pass complete
    Primed,
    /// Nullified legacy pass issued for an input
    Nullified(usize),
    /// Outputs finalized for a legacy input
    Finalized(usize),
    /// Witness pass issued for an input
    Segwit(usize),
    /// Signature returned for an input
    Signed(usize),
}

impl core::fmt::Display for SessionState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            SessionState::NotStarted => write!(f, "NotStarted"),
            SessionState::Primed => write!(f, "Primed"),
            SessionState::Nullified(i) => write!(f, "Nullified({i})"),
            SessionState::Finalized(i) => write!(f, "Finalized({i})"),
            SessionState::Segwit(i) => write!(f, "Segwit({i})"),
            SessionState::Signed(i) => write!(f, "Signed({i})"),
        }
    }
}

/// Session tracker, validating each step before it is issued
#[derive(Clone, Debug)]
pub(crate) struct Session {
    state: SessionState,
    primed: bool,
    legacy_started: bool,
}

impl Session {
    pub fn new() -> Self {
        Self {
            state: SessionState::NotStarted,
            primed: false,
            legacy_started: false,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Check a priming pass may start
    pub fn prime(&mut self) -> Result<(), Error> {
        check_state(self.state, SessionState::NotStarted)?;
        self.transition(SessionState::Primed);
        self.primed = true;
        Ok(())
    }

    /// Check a nullified legacy pass may start for input `i`, returning
    /// whether this is the first legacy pass of the session
    pub fn nullify(&mut self, i: usize) -> Result<bool, Error> {
        match self.state {
            SessionState::NotStarted | SessionState::Primed | SessionState::Signed(_) => (),
            s => return Err(Error::InvalidState(s, SessionState::NotStarted)),
        }

        let first = !self.legacy_started;
        self.legacy_started = true;
        self.transition(SessionState::Nullified(i));

        Ok(first)
    }

    /// Check outputs may be finalized for input `i`
    pub fn finalize(&mut self, i: usize) -> Result<(), Error> {
        check_state(self.state, SessionState::Nullified(i))?;
        self.transition(SessionState::Finalized(i));
        Ok(())
    }

    /// Check a witness pass may start for input `i`
    pub fn segwit(&mut self, i: usize) -> Result<(), Error> {
        match self.state {
            SessionState::Primed | SessionState::Signed(_) if self.primed => (),
            s => return Err(Error::InvalidState(s, SessionState::Primed)),
        }
        self.transition(SessionState::Segwit(i));
        Ok(())
    }

    /// Check a signature may be requested for input `i`
    pub fn sign(&mut self, i: usize) -> Result<(), Error> {
        match self.state {
            SessionState::Finalized(n) | SessionState::Segwit(n) if n == i => (),
            s => return Err(Error::InvalidState(s, SessionState::Finalized(i))),
        }
        self.transition(SessionState::Signed(i));
        Ok(())
    }

    fn transition(&mut self, next: SessionState) {
        debug!("Session state: {:?} -> {:?}", self.state, next);
        self.state = next;
    }
}

/// Helper to check state when executing signing steps
pub(crate) fn check_state(actual: SessionState, expected: SessionState) -> Result<(), Error> {
    if actual != expected {
        Err(Error::InvalidState(actual, expected))
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn legacy_flow() {
        let mut s = Session::new();

        assert!(s.nullify(0).unwrap());
        s.finalize(0).unwrap();
        s.sign(0).unwrap();

        // Subsequent passes continue the session
        assert!(!s.nullify(1).unwrap());
        s.finalize(1).unwrap();
        s.sign(1).unwrap();

        assert_eq!(s.state(), SessionState::Signed(1));
    }

    #[test]
    fn witness_flow() {
        let mut s = Session::new();

        // Witness passes require priming
        assert!(matches!(s.segwit(0), Err(Error::InvalidState(..))));

        s.prime().unwrap();
        s.segwit(0).unwrap();
        s.sign(0).unwrap();

        // Mixed inputs start legacy hashing after priming
        assert!(s.nullify(1).unwrap());
        s.finalize(1).unwrap();
        s.sign(1).unwrap();

        // Priming happens once
        assert!(matches!(s.prime(), Err(Error::InvalidState(..))));
    }

    #[test]
    fn out_of_order_steps() {
        let mut s = Session::new();

        assert!(matches!(
            s.sign(0),
            Err(Error::InvalidState(SessionState::NotStarted, _))
        ));

        s.nullify(0).unwrap();
        assert!(matches!(s.finalize(1), Err(Error::InvalidState(..))));
        assert!(matches!(s.sign(0), Err(Error::InvalidState(..))));
    }

    #[test]
    fn state_display_includes_index() {
        let mut s = Session::new();
        s.nullify(3).unwrap();

        let e = s.finalize(1).unwrap_err();
        assert_eq!(
            e.to_string(),
            "Invalid session state (actual: Nullified(3), expected: Nullified(1))"
        );

        assert_eq!(SessionState::Signed(2).to_string(), "Signed(2)");
        assert_eq!(SessionState::Primed.to_string(), "Primed");
    }
}
