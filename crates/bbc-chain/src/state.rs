/// Per-entry state machine (spec §4.2 "State machine per entry"). Store
/// persistence only ever holds `Valid` entries; `Orphan` lives in the
/// orphan pool and `Invalid` in the in-memory invalid set, so this enum is
/// mostly useful for event reporting and tests.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntryState {
    Unknown,
    Orphan,
    Headers,
    Valid,
    Invalid,
}
