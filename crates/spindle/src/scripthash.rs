//! Electrum script hashes.

use std::str::FromStr;

use bitcoin::hashes::{sha256, Hash};
use bitcoin::hex::DisplayHex;
use bitcoin::{Address, Network, ScriptBuf};
use eyre::WrapErr;

/// SHA-256 of the script, byte-reversed and hex encoded.
pub fn for_script(script: &ScriptBuf) -> String {
    let mut digest = sha256::Hash::hash(script.as_bytes()).to_byte_array();
    digest.reverse();
    digest.as_slice().to_lower_hex_string()
}

/// Script hash of `address`, which must belong to `network`.
pub fn for_address(address: &str, network: Network) -> eyre::Result<String> {
    let address = Address::from_str(address)
        .wrap_err_with(|| format!("parse address `{address}`"))?
        .require_network(network)
        .wrap_err_with(|| format!("address is not a {network} address"))?;
    Ok(for_script(&address.script_pubkey()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn genesis_address_matches_published_script_hash() {
        let hash = for_address("1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa", Network::Bitcoin)
            .expect("valid mainnet address");
        assert_eq!(
            hash,
            "8b01df4e368ea28f8dc0423bcf7a4923e3a12d307c875e47a0cfbf90b5c39161"
        );
    }

    #[test]
    fn wrong_network_is_rejected() {
        for_address("1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa", Network::Testnet)
            .expect_err("mainnet address on testnet");
    }

    #[test]
    fn garbage_is_rejected() {
        for_address("not-an-address", Network::Bitcoin).expect_err("garbage");
    }
}
