//! Integration tests of the wallet engine against a mock chain
