//! Project identifier generation.
//!
//! Credentials without a `project_id` get one of the form
//! `<adjective>-<noun>-<5 base36 chars>` on first load; the value is
//! persisted and never regenerated.

use rand::Rng;

const ADJECTIVES: &[&str] = &[
    "amber", "bold", "calm", "dapper", "eager", "fuzzy", "gentle", "happy", "icy", "jolly",
    "keen", "lively", "mellow", "noble", "opal", "proud", "quiet", "rapid", "sunny", "tidy",
    "vivid", "witty", "young", "zesty",
];

const NOUNS: &[&str] = &[
    "anchor", "beacon", "cactus", "delta", "ember", "falcon", "garnet", "harbor", "island",
    "jaguar", "kite", "lagoon", "meadow", "nebula", "otter", "prairie", "quartz", "river",
    "summit", "tundra", "violet", "walnut", "yonder", "zephyr",
];

const BASE36: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

pub fn generate_project_id() -> String {
    let mut rng = rand::thread_rng();
    let adjective = ADJECTIVES[rng.gen_range(0..ADJECTIVES.len())];
    let noun = NOUNS[rng.gen_range(0..NOUNS.len())];
    let suffix: String =
        (0..5).map(|_| BASE36[rng.gen_range(0..BASE36.len())] as char).collect();
    format!("{adjective}-{noun}-{suffix}")
}
