//! Empty library target; this crate exists to host the black-box scenario
//! suite under `tests/` against the rest of the workspace.
