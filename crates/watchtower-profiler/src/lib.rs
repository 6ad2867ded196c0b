//! Contributor profiling and anomaly scoring.
//!
//! Commits group by lowercased author email into per-contributor statistical
//! baselines ([`build_profiles`]); individual commits are then scored
//! against their author's baseline ([`score_commits`]) with a set of
//! additive factors. Both passes are pure computation over data already in
//! memory; contributors are independent of each other, so the work is safe
//! to parallelise if it ever needs to be.

mod anomaly;
mod profile;

pub use anomaly::score_commits;
pub use profile::build_profiles;
