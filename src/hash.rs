use tiny_keccak::{Hasher, Keccak};

pub const HASH_SIZE: usize = 32;

pub type Digest = [u8; HASH_SIZE];

pub fn hash(input: &[u8]) -> Digest {
    let mut hasher = Keccak::v256();
    hasher.update(input);
    let mut output = [0u8; HASH_SIZE];
    hasher.finalize(&mut output);
    output
}
