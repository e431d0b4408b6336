//! Per-currency chain parameters: protocol version, genesis block, subsidy
//! schedule, address version bytes, upgrade quorum/majority thresholds, and
//! the few places individual members of the chain family diverge from the
//! shared consensus kernel (Namecoin's name-fee schedule, Dogecoin's
//! maturity switch-over, auxiliary proof-of-work).

use crate::block::{Block, BlockHeader};
use coin_primitives::address::{AddressKind, ChainAddress};
use coin_primitives::hash::{Hash160, Hash256};

pub const COIN: i64 = 100_000_000;

/// 4-byte network magic prefixing every wire message.
pub type MessageStart = [u8; 4];

/// Which of the six supported currencies a `ChainParams` describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainKind {
    Bitcoin,
    Testnet3,
    Namecoin,
    Litecoin,
    Terracoin,
    Dogecoin,
}

/// Parameters that distinguish one chain in the family from another. Every
/// method has a sensible Bitcoin-shaped default; concrete chains override
/// only what actually differs, mirroring the C++ `Chain` base class this
/// was ported from.
pub trait ChainParams: Send + Sync {
    fn kind(&self) -> ChainKind;
    fn name(&self) -> &'static str;
    fn protocol_version(&self) -> u32;
    fn genesis_block(&self) -> Block;
    fn genesis_hash(&self) -> Hash256 {
        self.genesis_block().header.hash()
    }
    fn subsidy(&self, height: u32) -> i64;

    /// Proof-of-work target ceiling (the easiest allowed difficulty), as the
    /// compact `nBits` encoding.
    fn proof_of_work_limit_bits(&self) -> u32;

    fn max_inter_block_time(&self) -> i64 {
        i64::MAX
    }

    /// The relaxed target a share must meet. Defaults to
    /// the chain's own proof-of-work floor: the loosest target any block
    /// header is ever allowed to declare, so any correctly-formed header
    /// qualifies as a share regardless of the main chain's current
    /// difficulty.
    fn share_target_bits(&self) -> u32 {
        self.proof_of_work_limit_bits()
    }

    /// Seconds the difficulty retarget window covers. Defaults to Bitcoin's
    /// two weeks; chains with a different block spacing override this (and
    /// usually `target_spacing` to match) rather than the derived interval.
    fn target_timespan(&self) -> i64 {
        14 * 24 * 60 * 60
    }

    /// Intended seconds between blocks.
    fn target_spacing(&self) -> i64 {
        10 * 60
    }

    /// How many blocks make up one retarget window: `target_timespan /
    /// target_spacing`, e.g. 2016 for Bitcoin's two-week window over
    /// ten-minute blocks.
    fn retarget_interval(&self) -> u32 {
        (self.target_timespan() / self.target_spacing()).max(1) as u32
    }

    fn adhere_aux_pow(&self) -> bool {
        false
    }

    fn adhere_names(&self) -> bool {
        false
    }

    fn enforce_name_rules(&self, _height: i64) -> bool {
        false
    }

    fn bip16_activation_time(&self) -> i64 {
        1_333_238_400
    }

    fn bip30_activation_time(&self) -> i64 {
        1_331_769_600
    }

    fn maturity(&self, _height: u32) -> u32 {
        100
    }

    fn max_money(&self) -> i64 {
        21_000_000 * COIN
    }

    fn max_block_size(&self) -> usize {
        1_000_000
    }

    fn in_money_range(&self, value: i64) -> bool {
        value >= 0 && value <= self.max_money()
    }

    fn min_fee(&self) -> i64 {
        0
    }

    fn network_fee(&self, _height: i64) -> i64 {
        0
    }

    fn expiration_depth(&self, _height: i64) -> i64 {
        0
    }

    fn accept_quorum(&self) -> usize {
        1000
    }

    fn accept_majority(&self) -> usize {
        950
    }

    fn enforce_quorum(&self) -> usize {
        1000
    }

    fn enforce_majority(&self) -> usize {
        750
    }

    /// Hard-coded (height, hash) pins a chain is never allowed to
    /// reorganise across. Empty for chains without a curated checkpoint
    /// list; `check_point` treats an unlisted height as automatically
    /// satisfied.
    fn checkpoints(&self) -> &'static [(u32, &'static str)] {
        &[]
    }

    /// `false` only if `height` is a checkpoint and `hash` disagrees with
    /// it; true for every other height, including ones this chain has no
    /// opinion about.
    fn check_point(&self, height: u32, hash: &Hash256) -> bool {
        for (checkpoint_height, checkpoint_hex) in self.checkpoints() {
            if *checkpoint_height == height {
                return Hash256::try_from(*checkpoint_hex)
                    .map(|expected| expected == *hash)
                    .unwrap_or(true);
            }
        }
        true
    }

    fn pubkey_hash_version(&self) -> u8;
    fn script_hash_version(&self) -> Option<u8>;

    fn address_for_pubkey_hash(&self, hash: Hash160) -> ChainAddress {
        ChainAddress::new(self.pubkey_hash_version(), hash, AddressKind::PubKeyHash)
    }

    fn address_for_script_hash(&self, hash: Hash160) -> Option<ChainAddress> {
        self.script_hash_version()
            .map(|v| ChainAddress::new(v, hash, AddressKind::ScriptHash))
    }

    fn signed_message_magic(&self) -> &'static str {
        "LibCoin Signed Message:\n"
    }

    fn message_start(&self) -> MessageStart;
    fn default_port(&self) -> u16;
    fn irc_channel(&self) -> &'static str {
        self.name()
    }
    fn irc_channels(&self) -> u32 {
        1
    }
}

/// Bitcoin-style halving subsidy: `initial >> (height / interval)`.
fn halving_subsidy(initial: i64, interval: u32, height: u32) -> i64 {
    let halvings = height / interval;
    if halvings >= 64 {
        0
    } else {
        initial >> halvings
    }
}

pub struct BitcoinChain {
    genesis: Block,
}

impl BitcoinChain {
    #[must_use]
    pub fn new() -> Self {
        Self {
            genesis: crate::block::genesis::bitcoin_genesis(),
        }
    }
}

impl Default for BitcoinChain {
    fn default() -> Self {
        Self::new()
    }
}

impl ChainParams for BitcoinChain {
    fn kind(&self) -> ChainKind {
        ChainKind::Bitcoin
    }
    fn name(&self) -> &'static str {
        "bitcoin"
    }
    fn protocol_version(&self) -> u32 {
        70002
    }
    fn genesis_block(&self) -> Block {
        self.genesis.clone()
    }
    fn subsidy(&self, height: u32) -> i64 {
        halving_subsidy(50 * COIN, 210_000, height)
    }
    fn proof_of_work_limit_bits(&self) -> u32 {
        0x1d00_ffff
    }
    fn min_fee(&self) -> i64 {
        10_000
    }
    fn pubkey_hash_version(&self) -> u8 {
        0x00
    }
    fn script_hash_version(&self) -> Option<u8> {
        Some(0x05)
    }
    fn signed_message_magic(&self) -> &'static str {
        "Bitcoin Signed Message:\n"
    }
    fn message_start(&self) -> MessageStart {
        [0xF9, 0xBE, 0xB4, 0xD9]
    }
    fn default_port(&self) -> u16 {
        8333
    }
    fn irc_channels(&self) -> u32 {
        100
    }
    fn checkpoints(&self) -> &'static [(u32, &'static str)] {
        &[
            (0, "000000000019d6689c085ae165831e934ff763ae46a2a6c172b3f1b60a8ce26"),
            (1, "00000000839a8e6886ab5951d76f411475428afc90947ee320161bbf18eb6048"),
        ]
    }
}

pub struct TestNet3Chain {
    genesis: Block,
}

impl TestNet3Chain {
    #[must_use]
    pub fn new() -> Self {
        Self {
            genesis: crate::block::genesis::testnet3_genesis(),
        }
    }
}

impl Default for TestNet3Chain {
    fn default() -> Self {
        Self::new()
    }
}

impl ChainParams for TestNet3Chain {
    fn kind(&self) -> ChainKind {
        ChainKind::Testnet3
    }
    fn name(&self) -> &'static str {
        "testnet3"
    }
    fn protocol_version(&self) -> u32 {
        70002
    }
    fn genesis_block(&self) -> Block {
        self.genesis.clone()
    }
    fn subsidy(&self, height: u32) -> i64 {
        halving_subsidy(50 * COIN, 210_000, height)
    }
    fn proof_of_work_limit_bits(&self) -> u32 {
        0x1d00_ffff
    }
    fn max_inter_block_time(&self) -> i64 {
        2 * 10 * 60
    }
    fn bip16_activation_time(&self) -> i64 {
        1_329_264_000
    }
    fn bip30_activation_time(&self) -> i64 {
        1_329_696_000
    }
    fn accept_quorum(&self) -> usize {
        100
    }
    fn accept_majority(&self) -> usize {
        75
    }
    fn enforce_quorum(&self) -> usize {
        100
    }
    fn enforce_majority(&self) -> usize {
        51
    }
    fn pubkey_hash_version(&self) -> u8 {
        0x6f
    }
    fn script_hash_version(&self) -> Option<u8> {
        Some(0xc4)
    }
    fn signed_message_magic(&self) -> &'static str {
        "Bitcoin Signed Message:\n"
    }
    fn message_start(&self) -> MessageStart {
        [0x0B, 0x11, 0x09, 0x07]
    }
    fn default_port(&self) -> u16 {
        18333
    }
    fn irc_channel(&self) -> &'static str {
        "bitcoinTEST"
    }
}

pub struct NamecoinChain {
    genesis: Block,
}

impl NamecoinChain {
    #[must_use]
    pub fn new() -> Self {
        Self {
            genesis: crate::block::genesis::namecoin_genesis(),
        }
    }
}

impl Default for NamecoinChain {
    fn default() -> Self {
        Self::new()
    }
}

impl ChainParams for NamecoinChain {
    fn kind(&self) -> ChainKind {
        ChainKind::Namecoin
    }
    fn name(&self) -> &'static str {
        "namecoin"
    }
    fn protocol_version(&self) -> u32 {
        37200
    }
    fn genesis_block(&self) -> Block {
        self.genesis.clone()
    }
    fn subsidy(&self, height: u32) -> i64 {
        halving_subsidy(50 * COIN, 210_000, height)
    }
    fn proof_of_work_limit_bits(&self) -> u32 {
        0x1d00_ffff
    }
    fn adhere_aux_pow(&self) -> bool {
        true
    }
    fn adhere_names(&self) -> bool {
        true
    }
    fn enforce_name_rules(&self, height: i64) -> bool {
        if height > 500_000_000 {
            height > 1_386_499_470
        } else {
            height > 150_000
        }
    }
    fn min_fee(&self) -> i64 {
        500_000
    }
    fn network_fee(&self, height: i64) -> i64 {
        let mut h = height - 1;
        if h >= 24_000 {
            h += (h - 24_000) * 3;
        }
        if (h >> 13) >= 60 {
            return 0;
        }
        let start = 50 * COIN;
        let mut res = start >> (h >> 13);
        res -= (res >> 14) * (h % 8192);
        res
    }
    fn expiration_depth(&self, height: i64) -> i64 {
        let h = height - 1;
        if h < 24_000 {
            12_000
        } else if h < 48_000 {
            h - 12_000
        } else {
            36_000
        }
    }
    fn accept_quorum(&self) -> usize {
        1000
    }
    fn accept_majority(&self) -> usize {
        1001
    }
    fn enforce_quorum(&self) -> usize {
        1000
    }
    fn enforce_majority(&self) -> usize {
        1001
    }
    fn pubkey_hash_version(&self) -> u8 {
        0x34
    }
    fn script_hash_version(&self) -> Option<u8> {
        None
    }
    fn signed_message_magic(&self) -> &'static str {
        "Namecoin Signed Message:\n"
    }
    fn message_start(&self) -> MessageStart {
        [0xF9, 0xBE, 0xB4, 0xFE]
    }
    fn default_port(&self) -> u16 {
        8334
    }
}

pub struct LitecoinChain {
    genesis: Block,
}

impl LitecoinChain {
    #[must_use]
    pub fn new() -> Self {
        Self {
            genesis: crate::block::genesis::litecoin_genesis(),
        }
    }
}

impl Default for LitecoinChain {
    fn default() -> Self {
        Self::new()
    }
}

impl ChainParams for LitecoinChain {
    fn kind(&self) -> ChainKind {
        ChainKind::Litecoin
    }
    fn name(&self) -> &'static str {
        "litecoin"
    }
    fn protocol_version(&self) -> u32 {
        70002
    }
    fn genesis_block(&self) -> Block {
        self.genesis.clone()
    }
    fn subsidy(&self, height: u32) -> i64 {
        halving_subsidy(50 * COIN, 840_000, height)
    }
    fn proof_of_work_limit_bits(&self) -> u32 {
        0x1e0f_ffff
    }
    fn bip16_activation_time(&self) -> i64 {
        1_349_049_600
    }
    fn bip30_activation_time(&self) -> i64 {
        1_349_049_600
    }
    fn min_fee(&self) -> i64 {
        500_000
    }
    fn target_timespan(&self) -> i64 {
        3 * 24 * 60 * 60 + 12 * 60 * 60 // 3.5 days
    }
    fn target_spacing(&self) -> i64 {
        150
    }
    fn accept_quorum(&self) -> usize {
        1000
    }
    fn accept_majority(&self) -> usize {
        1001
    }
    fn enforce_quorum(&self) -> usize {
        1000
    }
    fn enforce_majority(&self) -> usize {
        1001
    }
    fn pubkey_hash_version(&self) -> u8 {
        0x30
    }
    fn script_hash_version(&self) -> Option<u8> {
        Some(0x05)
    }
    fn signed_message_magic(&self) -> &'static str {
        "Litecoin Signed Message:\n"
    }
    fn message_start(&self) -> MessageStart {
        [0xFB, 0xC0, 0xB6, 0xDB]
    }
    fn default_port(&self) -> u16 {
        9333
    }
}

pub struct TerracoinChain {
    genesis: Block,
}

impl TerracoinChain {
    #[must_use]
    pub fn new() -> Self {
        Self {
            genesis: crate::block::genesis::terracoin_genesis(),
        }
    }
}

impl Default for TerracoinChain {
    fn default() -> Self {
        Self::new()
    }
}

impl ChainParams for TerracoinChain {
    fn kind(&self) -> ChainKind {
        ChainKind::Terracoin
    }
    fn name(&self) -> &'static str {
        "terracoin"
    }
    fn protocol_version(&self) -> u32 {
        70002
    }
    fn genesis_block(&self) -> Block {
        self.genesis.clone()
    }
    fn subsidy(&self, height: u32) -> i64 {
        halving_subsidy(20 * COIN, 420_000, height)
    }
    fn proof_of_work_limit_bits(&self) -> u32 {
        0x1d00_ffff
    }
    fn bip16_activation_time(&self) -> i64 {
        1_349_049_600
    }
    fn bip30_activation_time(&self) -> i64 {
        1_349_049_600
    }
    fn max_money(&self) -> i64 {
        8_400_000_000_000_000
    }
    fn pubkey_hash_version(&self) -> u8 {
        0x30
    }
    fn script_hash_version(&self) -> Option<u8> {
        Some(0x05)
    }
    fn message_start(&self) -> MessageStart {
        [0x42, 0x9B, 0xBD, 0xA5]
    }
    fn default_port(&self) -> u16 {
        9333
    }
}

pub struct DogecoinChain {
    genesis: Block,
}

impl DogecoinChain {
    #[must_use]
    pub fn new() -> Self {
        Self {
            genesis: crate::block::genesis::dogecoin_genesis(),
        }
    }
}

impl Default for DogecoinChain {
    fn default() -> Self {
        Self::new()
    }
}

impl ChainParams for DogecoinChain {
    fn kind(&self) -> ChainKind {
        ChainKind::Dogecoin
    }
    fn name(&self) -> &'static str {
        "dogecoin"
    }
    fn protocol_version(&self) -> u32 {
        70002
    }
    fn genesis_block(&self) -> Block {
        self.genesis.clone()
    }
    fn subsidy(&self, height: u32) -> i64 {
        if height >= 600_000 {
            10_000 * COIN
        } else {
            halving_subsidy(500_000 * COIN, 100_000, height)
        }
    }
    fn proof_of_work_limit_bits(&self) -> u32 {
        0x1e0f_ffff
    }
    fn bip16_activation_time(&self) -> i64 {
        1_349_049_600
    }
    fn bip30_activation_time(&self) -> i64 {
        1_349_049_600
    }
    fn maturity(&self, height: u32) -> u32 {
        const COINBASE_MATURITY: u32 = 30;
        const COINBASE_MATURITY_NEW: u32 = 60 * 4;
        const SWITCH: u32 = 145_000;
        if height >= SWITCH {
            COINBASE_MATURITY_NEW
        } else {
            COINBASE_MATURITY
        }
    }
    /// Approximates Dogecoin's post-Digishield one-minute blocks with a
    /// shorter, more frequent retarget window rather than modelling
    /// Digishield's per-block exponential-moving-average adjustment, which
    /// this implementation does not reproduce.
    fn target_timespan(&self) -> i64 {
        4 * 60 * 60
    }
    fn target_spacing(&self) -> i64 {
        60
    }
    fn max_money(&self) -> i64 {
        1_000_000_000_000_000_000
    }
    fn min_fee(&self) -> i64 {
        100_000_000
    }
    fn accept_quorum(&self) -> usize {
        1000
    }
    fn accept_majority(&self) -> usize {
        1001
    }
    fn enforce_quorum(&self) -> usize {
        1000
    }
    fn enforce_majority(&self) -> usize {
        1001
    }
    fn pubkey_hash_version(&self) -> u8 {
        0x1e
    }
    fn script_hash_version(&self) -> Option<u8> {
        Some(0x16)
    }
    fn signed_message_magic(&self) -> &'static str {
        "Dogecoin Signed Message:\n"
    }
    fn message_start(&self) -> MessageStart {
        [0xC0, 0xC0, 0xC0, 0xC0]
    }
    fn default_port(&self) -> u16 {
        22556
    }
}

/// Builds the `ChainParams` implementation for a `ChainKind`.
#[must_use]
pub fn params_for(kind: ChainKind) -> Box<dyn ChainParams> {
    match kind {
        ChainKind::Bitcoin => Box::new(BitcoinChain::new()),
        ChainKind::Testnet3 => Box::new(TestNet3Chain::new()),
        ChainKind::Namecoin => Box::new(NamecoinChain::new()),
        ChainKind::Litecoin => Box::new(LitecoinChain::new()),
        ChainKind::Terracoin => Box::new(TerracoinChain::new()),
        ChainKind::Dogecoin => Box::new(DogecoinChain::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bitcoin_subsidy_halves_on_schedule() {
        let chain = BitcoinChain::new();
        assert_eq!(chain.subsidy(0), 50 * COIN);
        assert_eq!(chain.subsidy(209_999), 50 * COIN);
        assert_eq!(chain.subsidy(210_000), 25 * COIN);
        assert_eq!(chain.subsidy(420_000), 1250_0000);
    }

    #[test]
    fn dogecoin_fixes_subsidy_after_block_600000() {
        let chain = DogecoinChain::new();
        assert_eq!(chain.subsidy(600_000), 10_000 * COIN);
        assert_eq!(chain.subsidy(1_000_000), 10_000 * COIN);
    }

    #[test]
    fn dogecoin_maturity_switches_at_145000() {
        let chain = DogecoinChain::new();
        assert_eq!(chain.maturity(144_999), 30);
        assert_eq!(chain.maturity(145_000), 240);
    }

    #[test]
    fn testnet3_has_relaxed_quorum() {
        let chain = TestNet3Chain::new();
        assert_eq!(chain.accept_quorum(), 100);
        assert_eq!(chain.enforce_majority(), 51);
    }

    #[test]
    fn namecoin_enforces_name_rules_after_block_150000() {
        let chain = NamecoinChain::new();
        assert!(!chain.enforce_name_rules(150_000));
        assert!(chain.enforce_name_rules(150_001));
    }

    #[test]
    fn bitcoin_mainnet_address_uses_version_zero() {
        let chain = BitcoinChain::new();
        let hash = Hash160::hash160(b"pubkey");
        let addr = chain.address_for_pubkey_hash(hash);
        assert_eq!(addr.version(), 0x00);
    }

    #[test]
    fn namecoin_has_no_script_hash_addresses() {
        let chain = NamecoinChain::new();
        assert!(chain.script_hash_version().is_none());
    }

    #[test]
    fn bitcoin_checkpoint_rejects_a_mismatched_hash_at_a_pinned_height() {
        let chain = BitcoinChain::new();
        assert!(chain.check_point(0, &chain.genesis_hash()));
        assert!(!chain.check_point(0, &Hash256::double_sha256(b"not genesis")));
        // heights with no pinned checkpoint are unconstrained.
        assert!(chain.check_point(500_000, &Hash256::double_sha256(b"whatever")));
    }

    #[test]
    fn retarget_interval_derives_from_timespan_and_spacing() {
        assert_eq!(BitcoinChain::new().retarget_interval(), 2016);
        assert_eq!(LitecoinChain::new().retarget_interval(), 2016);
        assert_eq!(DogecoinChain::new().retarget_interval(), 240);
    }
}
