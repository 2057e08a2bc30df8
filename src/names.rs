//! Default domain and key generation.

use rand::distributions::Alphanumeric;
use rand::seq::SliceRandom;
use rand::Rng;

/// Length of generated session keys.
pub const KEY_LENGTH: usize = 6;

const ADJECTIVES: &[&str] = &[
    "amber", "bold", "brave", "bright", "calm", "clever", "cosmic", "crisp", "curious", "dapper",
    "eager", "fancy", "fierce", "gentle", "golden", "happy", "hidden", "jolly", "keen", "lively",
    "lucky", "mellow", "misty", "nimble", "noble", "patient", "plucky", "proud", "quiet", "rapid",
    "rustic", "shiny", "silent", "silver", "sleepy", "snowy", "spry", "steady", "sunny", "swift",
    "tidy", "vivid", "wandering", "witty", "zesty",
];

const ANIMALS: &[&str] = &[
    "badger", "beaver", "bison", "crane", "falcon", "ferret", "finch", "fox", "gecko", "heron",
    "ibis", "jackal", "koala", "lemur", "lynx", "marten", "moose", "newt", "ocelot", "otter",
    "owl", "panda", "pelican", "puffin", "quail", "raven", "salmon", "seal", "sparrow", "stoat",
    "swan", "tapir", "tern", "toucan", "turtle", "vole", "walrus", "wombat", "wren", "yak",
];

/// A readable `adjective-animal` domain suggestion.
pub fn random_domain() -> String {
    let mut rng = rand::thread_rng();
    let adjective = ADJECTIVES.choose(&mut rng).copied().unwrap_or("swift");
    let animal = ANIMALS.choose(&mut rng).copied().unwrap_or("otter");
    format!("{adjective}-{animal}")
}

/// An alphanumeric session key of [`KEY_LENGTH`] characters.
pub fn random_key() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(KEY_LENGTH)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tunnel::normalize_domain;

    #[test]
    fn test_random_domain_is_already_normalized() {
        for _ in 0..50 {
            let domain = random_domain();
            assert_eq!(normalize_domain(&domain), domain);
            assert_eq!(domain.split('-').count(), 2);
        }
    }

    #[test]
    fn test_random_key_shape() {
        let key = random_key();
        assert_eq!(key.len(), KEY_LENGTH);
        assert!(key.chars().all(|c| c.is_ascii_alphanumeric()));
    }
}
