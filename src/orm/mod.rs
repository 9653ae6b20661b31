//! SeaORM entities backing the flag registry and assignment store.

pub mod feature_flags;
pub mod flag_assignments;
