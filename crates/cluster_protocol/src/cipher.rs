//! Lightweight stream cipher keyed by the registry-issued seed.
//!
//! This is line obfuscation, matching what channel clients have always
//! spoken. It is not meant to protect anything against an active attacker;
//! authentication is the shared-secret identify exchange.

/// Per-direction xorshift32 keystream.
///
/// Both ends build one instance for each direction from the same seed, so
/// the sender's encrypt stream and the receiver's decrypt stream stay in
/// lockstep as long as no frame is dropped.
#[derive(Debug, Clone)]
pub struct StreamCipher {
    state: u32,
}

impl StreamCipher {
    /// xorshift has a fixed point at zero.
    const ZERO_SEED_FIXUP: u32 = 0x9E37_79B9;

    /// Keystream starting from `seed`.
    pub fn new(seed: u32) -> Self {
        let state = if seed == 0 { Self::ZERO_SEED_FIXUP } else { seed };
        Self { state }
    }

    fn next_word(&mut self) -> u32 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.state = x;
        x
    }

    /// XORs the keystream over `data` in place. Encrypting and decrypting
    /// are the same operation.
    pub fn apply(&mut self, data: &mut [u8]) {
        for chunk in data.chunks_mut(4) {
            let key = self.next_word().to_le_bytes();
            for (byte, k) in chunk.iter_mut().zip(key.iter()) {
                *byte ^= k;
            }
        }
    }
}

/// The pair of keystreams owned by one end of a link.
#[derive(Debug, Clone)]
pub struct CipherPair {
    pub outbound: StreamCipher,
    pub inbound: StreamCipher,
}

impl CipherPair {
    /// Builds both directions from the shared seed. The registry and the
    /// node derive the same two streams; which one is "outbound" depends on
    /// the side.
    pub fn for_registry(seed: u32) -> Self {
        Self {
            outbound: StreamCipher::new(seed),
            inbound: StreamCipher::new(seed.rotate_left(16)),
        }
    }

    /// Node-side mirror of [`CipherPair::for_registry`].
    pub fn for_node(seed: u32) -> Self {
        Self {
            outbound: StreamCipher::new(seed.rotate_left(16)),
            inbound: StreamCipher::new(seed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_and_node_streams_line_up() {
        let seed = 0x1234_5678;
        let mut registry = CipherPair::for_registry(seed);
        let mut node = CipherPair::for_node(seed);

        let mut first = b"hello channel".to_vec();
        registry.outbound.apply(&mut first);
        assert_ne!(first, b"hello channel");
        node.inbound.apply(&mut first);
        assert_eq!(first, b"hello channel");

        // Keystream advances: the same plaintext encrypts differently next time
        let mut second = b"hello channel".to_vec();
        let mut third = b"hello channel".to_vec();
        node.outbound.apply(&mut second);
        node.outbound.apply(&mut third);
        assert_ne!(second, third);

        registry.inbound.apply(&mut second);
        registry.inbound.apply(&mut third);
        assert_eq!(second, b"hello channel");
        assert_eq!(third, b"hello channel");
    }

    #[test]
    fn test_zero_seed_still_scrambles() {
        let mut cipher = StreamCipher::new(0);
        let mut data = vec![0u8; 8];
        cipher.apply(&mut data);
        assert!(data.iter().any(|b| *b != 0));
    }
}
