//! Identity tokens minted for async invocations and element handles.

use std::sync::atomic::{AtomicU64, Ordering};

use once_cell::sync::Lazy;

static MINT: Lazy<TokenMint> = Lazy::new(TokenMint::new);

/// Produces GUID-shaped tokens. The last group carries a process-wide
/// sequence number, so two tokens from the same mint never collide.
#[derive(Debug)]
pub struct TokenMint {
    sequence: AtomicU64,
}

impl TokenMint {
    pub fn new() -> Self {
        Self {
            sequence: AtomicU64::new(1),
        }
    }

    /// The process-wide mint.
    pub fn global() -> &'static TokenMint {
        &MINT
    }

    pub fn mint(&self) -> String {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed) & 0xFFFF_FFFF_FFFF;
        let random: u64 = rand::random();
        let extra: u16 = rand::random();
        format!(
            "{{{:08X}-{:04X}-{:04X}-{:04X}-{:012X}}}",
            (random >> 32) as u32,
            (random >> 16) as u16,
            random as u16,
            extra,
            sequence
        )
    }
}

impl Default for TokenMint {
    fn default() -> Self {
        Self::new()
    }
}

/// Mint a token from the process-wide mint.
pub fn mint_token() -> String {
    TokenMint::global().mint()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn tokens_are_guid_shaped_and_unique() {
        let mint = TokenMint::new();
        let tokens: HashSet<String> = (0..500).map(|_| mint.mint()).collect();
        assert_eq!(tokens.len(), 500);

        let sample = mint.mint();
        assert_eq!(sample.len(), 38);
        assert!(sample.starts_with('{') && sample.ends_with('}'));
        assert_eq!(sample.matches('-').count(), 4);
    }
}
