//! Session ids and the table of outstanding callbacks.

use std::collections::HashMap;
use std::fmt;
use std::num::NonZeroU8;

use tokio::sync::oneshot;
use zwire_frame::{DataFrame, FunctionType};

use crate::error::{DriverError, Result};

/// One-byte tag that ties a callback to the request that caused it.
///
/// 0 is reserved on the wire for "no callback requested", so a session id
/// is always in `1..=255`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(NonZeroU8);

impl SessionId {
    /// `None` for the reserved value 0.
    pub fn new(value: u8) -> Option<Self> {
        NonZeroU8::new(value).map(Self)
    }

    pub fn get(self) -> u8 {
        self.0.get()
    }

    /// Wire byte for an optional session: 0 means no callback.
    pub fn to_wire(session: Option<SessionId>) -> u8 {
        session.map_or(0, SessionId::get)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug)]
struct Entry {
    function: FunctionType,
    ticket: u64,
    armed: bool,
    tx: oneshot::Sender<DataFrame>,
}

/// Ownership token for a table entry.
///
/// Removal by reservation never touches an entry that a later request
/// reserved under the same session id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Reservation {
    pub session: SessionId,
    ticket: u64,
}

/// Outstanding callbacks keyed by session id.
///
/// A session id identifies at most one entry at a time, whatever its
/// function. Entries start unarmed; only armed entries match incoming
/// callbacks.
#[derive(Debug, Default)]
pub(crate) struct CallbackTable {
    entries: HashMap<SessionId, Entry>,
    last: u8,
    tickets: u64,
}

impl CallbackTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a session id and register an unarmed entry for it.
    pub fn reserve(
        &mut self,
        function: FunctionType,
        tx: oneshot::Sender<DataFrame>,
    ) -> Result<Reservation> {
        let session = self.next_free()?;
        self.tickets += 1;
        let ticket = self.tickets;
        self.entries.insert(
            session,
            Entry {
                function,
                ticket,
                armed: false,
                tx,
            },
        );
        Ok(Reservation { session, ticket })
    }

    /// Arm an entry so matching callbacks complete it.
    pub fn arm(&mut self, reservation: Reservation) -> bool {
        match self.entries.get_mut(&reservation.session) {
            Some(entry) if entry.ticket == reservation.ticket => {
                entry.armed = true;
                true
            }
            _ => false,
        }
    }

    /// Remove and return the completion for an armed `(function, session)`.
    pub fn take_armed(
        &mut self,
        function: FunctionType,
        session: SessionId,
    ) -> Option<oneshot::Sender<DataFrame>> {
        let matches = self
            .entries
            .get(&session)
            .is_some_and(|entry| entry.armed && entry.function == function);
        if !matches {
            return None;
        }
        self.entries.remove(&session).map(|entry| entry.tx)
    }

    /// Remove the entry if it still belongs to `reservation`.
    pub fn release(&mut self, reservation: Reservation) -> bool {
        let owned = self
            .entries
            .get(&reservation.session)
            .is_some_and(|entry| entry.ticket == reservation.ticket);
        if owned {
            self.entries.remove(&reservation.session);
        }
        owned
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Drop every entry; their waiters observe a closed channel.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Next id after the last one handed out, wrapping 255 to 1 and skipping
    /// ids still in use. Inspects each of the 255 ids at most once.
    fn next_free(&mut self) -> Result<SessionId> {
        let mut candidate = self.last;
        for _ in 0..u8::MAX {
            candidate = if candidate == u8::MAX { 1 } else { candidate + 1 };
            let Some(session) = SessionId::new(candidate) else {
                continue;
            };
            if !self.entries.contains_key(&session) {
                self.last = candidate;
                return Ok(session);
            }
        }
        Err(DriverError::SessionsExhausted)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use bytes::Bytes;

    use super::*;

    fn reserve(table: &mut CallbackTable) -> (Reservation, oneshot::Receiver<DataFrame>) {
        let (tx, rx) = oneshot::channel();
        let reservation = table.reserve(FunctionType::SendData, tx).unwrap();
        (reservation, rx)
    }

    #[test]
    fn zero_is_not_a_session_id() {
        assert!(SessionId::new(0).is_none());
        assert_eq!(SessionId::to_wire(None), 0);
        assert_eq!(SessionId::to_wire(SessionId::new(9)), 9);
    }

    #[test]
    fn ids_count_up_from_one_and_wrap_past_255() {
        let mut table = CallbackTable::new();
        let mut seen = Vec::new();
        for _ in 0..300 {
            let (reservation, _rx) = reserve(&mut table);
            seen.push(reservation.session.get());
            table.release(reservation);
        }
        assert_eq!(seen[0], 1);
        assert_eq!(seen[254], 255);
        assert_eq!(seen[255], 1);
        assert!(seen.iter().all(|id| *id != 0));
    }

    #[test]
    fn ids_in_use_are_skipped() {
        let mut table = CallbackTable::new();
        let mut held = Vec::new();
        let mut live = HashSet::new();
        for round in 0..600 {
            let (reservation, rx) = reserve(&mut table);
            assert!(
                live.insert(reservation.session),
                "round {round}: {} handed out twice",
                reservation.session
            );
            held.push((reservation, rx));
            // Keep every third id alive so wrap-around has to skip them.
            if round % 3 != 0 {
                let (done, _rx) = held.remove(0);
                table.release(done);
                live.remove(&done.session);
            }
            if live.len() >= 200 {
                break;
            }
        }
        assert_eq!(table.len(), live.len());
    }

    #[test]
    fn exhaustion_is_reported_and_recovers() {
        let mut table = CallbackTable::new();
        let mut held = Vec::new();
        for _ in 0..255 {
            held.push(reserve(&mut table));
        }
        let (tx, _rx) = oneshot::channel();
        assert!(matches!(
            table.reserve(FunctionType::SendData, tx),
            Err(DriverError::SessionsExhausted)
        ));

        let (freed, _rx) = held.remove(41);
        table.release(freed);
        let (again, _rx) = reserve(&mut table);
        assert_eq!(again.session, freed.session);
    }

    #[test]
    fn only_armed_entries_with_matching_function_complete() {
        let mut table = CallbackTable::new();
        let (reservation, mut rx) = reserve(&mut table);

        assert!(table
            .take_armed(FunctionType::SendData, reservation.session)
            .is_none());
        assert!(table.arm(reservation));
        assert!(table
            .take_armed(FunctionType::AddNodeToNetwork, reservation.session)
            .is_none());

        let tx = table
            .take_armed(FunctionType::SendData, reservation.session)
            .unwrap();
        tx.send(DataFrame::request(FunctionType::SendData, Bytes::new()))
            .unwrap();
        assert!(rx.try_recv().is_ok());
        assert_eq!(table.len(), 0);
    }

    #[test]
    fn stale_reservation_does_not_remove_reused_id() {
        let mut table = CallbackTable::new();
        let (first, _rx) = reserve(&mut table);
        table.arm(first);
        let _ = table.take_armed(FunctionType::SendData, first.session);

        // Cycle until the same id is handed out again.
        let mut reused = None;
        for _ in 0..255 {
            let (next, rx) = reserve(&mut table);
            if next.session == first.session {
                reused = Some((next, rx));
                break;
            }
            table.release(next);
        }
        let (reused, _rx) = reused.unwrap();

        assert!(!table.release(first));
        assert!(!table.arm(first));
        assert_eq!(table.len(), 1);
        assert!(table.release(reused));
    }
}
