//! A public crate that provides access to testvectors

/// The number of blocks most tests start with.
pub const BASE_HEIGHT: u32 = 3;

/// Mnemonic seeds shared by tests
pub mod seeds {
    /// Seed of the default funded test wallet
    pub const ABANDON_ABOUT_SEED: &str = "abandon abandon abandon abandon abandon abandon abandon \
abandon abandon abandon abandon about";
    /// Seed of the default recipient test wallet
    pub const ZOO_WRONG_SEED: &str = "zoo zoo zoo zoo zoo zoo zoo zoo zoo zoo zoo wrong";
    /// Seed of a third test wallet
    pub const LEGAL_WINNER_SEED: &str = "legal winner thank year wave sausage worth useful legal \
winner thank yellow";

    #[test]
    fn seeds_are_valid_mnemonics() {
        for phrase in [ABANDON_ABOUT_SEED, ZOO_WRONG_SEED, LEGAL_WINNER_SEED] {
            assert!(
                bip0039::Mnemonic::<bip0039::English>::from_phrase(phrase).is_ok(),
                "{phrase}"
            );
        }
    }
}

/// Values used to fund test wallets
pub mod block_rewards {
    /// Value of a single funding note
    pub const FUNDING_NOTE_VALUE: u64 = 1_000_000;
    /// Fixed fee used by tests that check exact change values
    pub const FIXED_TEST_FEE: u64 = 10;
}

/// Defaults of the mock chain
pub mod mock_chain {
    /// Block time of the first mined block
    pub const GENESIS_TIME: u32 = 1_700_000_000;
    /// Seconds between mocked blocks
    pub const BLOCK_INTERVAL: u32 = 75;
}
