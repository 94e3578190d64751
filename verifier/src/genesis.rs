//! One-shot genesis import: the RLP genesis block and the JSON account
//! dump that seeds the state trie.

use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use anyhow::{bail, Context, Result};
use cached_mpt::UsedNodes;
use ethereum_types::{Address, H256, U256};
use flate2::bufread::GzDecoder;
use keccak_hash::keccak;
use serde::Deserialize;
use tracing::info;

use crate::account::{Account, EMPTY_BUFFER_HASH, EMPTY_STRING_HASH};
use crate::block::Block;
use crate::state::{StateTrie, WriteSet};

/// One account of the dump. Numbers may be decimal or 0x-hex strings;
/// unrecognized fields (storage roots, key images) are ignored.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DumpAccount {
    balance: String,
    #[serde(default)]
    nonce: Option<String>,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    code_hash: Option<String>,
    #[serde(default)]
    storage: Option<HashMap<String, String>>,
}

#[derive(Debug, Deserialize)]
struct Dump {
    accounts: HashMap<String, DumpAccount>,
}

/// Loads the RLP-encoded genesis block.
pub fn load_genesis_block(path: &Path) -> Result<Block> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("unable to read genesis block {}", path.display()))?;
    Block::decode(&bytes).context("malformed genesis block")
}

/// Imports the JSON account dump (gzip is sniffed from the magic bytes)
/// and builds the genesis state trie.
///
/// Per-account validation: a declared code hash must match
/// `keccak(code)`, and accounts with non-empty storage are rejected
/// outright since contract storage is not supported.
pub fn load_genesis_state(path: &Path) -> Result<StateTrie> {
    let file =
        File::open(path).with_context(|| format!("unable to open {}", path.display()))?;
    let mut reader = BufReader::new(file);

    let dump: Dump = if is_gzip(&mut reader)? {
        serde_json::from_reader(BufReader::new(GzDecoder::new(reader)))
    } else {
        serde_json::from_reader(reader)
    }
    .context("malformed genesis dump")?;

    let mut write_set = WriteSet::new();
    for (address_hex, dumped) in &dump.accounts {
        let address = parse_address(address_hex)?;
        let account = convert_account(dumped)
            .with_context(|| format!("genesis account {address_hex}"))?;
        write_set.insert(address, keccak(address), account);
    }

    let trie = StateTrie::default()
        .commit(&write_set, &mut UsedNodes::new(), &[])
        .context("building genesis trie")?;
    info!(accounts = dump.accounts.len(), root = %trie.root(), "genesis state imported");
    Ok(trie)
}

/// Loads both genesis artifacts and checks the computed state root
/// against the header's; a mismatch aborts startup.
pub fn import(block_path: &Path, data_path: &Path) -> Result<(Block, StateTrie)> {
    let block = load_genesis_block(block_path)?;
    let trie = load_genesis_state(data_path)?;
    if trie.root() != block.header.state_root {
        bail!(
            "genesis state root mismatch: computed {:x}, header declares {:x}",
            trie.root(),
            block.header.state_root
        );
    }
    Ok((block, trie))
}

fn convert_account(dumped: &DumpAccount) -> Result<Account> {
    if dumped.storage.as_ref().is_some_and(|s| !s.is_empty()) {
        bail!("accounts with storage are not yet supported");
    }

    let code = match &dumped.code {
        Some(code_hex) => hex::decode(code_hex.trim_start_matches("0x"))
            .context("code is not valid hex")?,
        None => Vec::new(),
    };
    let computed_code_hash = if code.is_empty() {
        EMPTY_STRING_HASH
    } else {
        keccak(&code)
    };
    if let Some(declared) = &dumped.code_hash {
        let declared = parse_h256(declared)?;
        if declared != computed_code_hash {
            bail!(
                "declared code hash {declared:x} does not match keccak(code) {computed_code_hash:x}"
            );
        }
    }

    Ok(Account {
        nonce: match &dumped.nonce {
            Some(nonce) => parse_u256(nonce)?,
            None => U256::zero(),
        },
        balance: parse_u256(&dumped.balance)?,
        storage_root: EMPTY_BUFFER_HASH,
        code_hash: computed_code_hash,
    })
}

fn is_gzip(reader: &mut BufReader<File>) -> Result<bool> {
    use std::io::{BufRead, Seek, SeekFrom};
    let magic = {
        let buf = reader.fill_buf()?;
        buf.len() >= 2 && buf[0] == 0x1f && buf[1] == 0x8b
    };
    reader.seek(SeekFrom::Start(0))?;
    Ok(magic)
}

fn parse_address(hex_str: &str) -> Result<Address> {
    let bytes = hex::decode(hex_str.trim_start_matches("0x")).context("address is not hex")?;
    if bytes.len() != 20 {
        bail!("address must be 20 bytes, got {}", bytes.len());
    }
    Ok(Address::from_slice(&bytes))
}

fn parse_h256(hex_str: &str) -> Result<H256> {
    let bytes = hex::decode(hex_str.trim_start_matches("0x")).context("digest is not hex")?;
    if bytes.len() != 32 {
        bail!("digest must be 32 bytes, got {}", bytes.len());
    }
    Ok(H256::from_slice(&bytes))
}

fn parse_u256(s: &str) -> Result<U256> {
    if let Some(hex_str) = s.strip_prefix("0x") {
        U256::from_str_radix(hex_str, 16).context("not a hex number")
    } else {
        U256::from_dec_str(s).context("not a decimal number")
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn write_dump(json: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(json.as_bytes()).unwrap();
        file
    }

    #[test]
    fn imports_accounts_and_computes_a_root() {
        let file = write_dump(
            r#"{"accounts": {
                "0x00000000000000000000000000000000000000aa": {"balance": "100"},
                "0x00000000000000000000000000000000000000bb": {"balance": "0x40", "nonce": "2"}
            }}"#,
        );
        let trie = load_genesis_state(file.path()).unwrap();

        let address: Address = "00000000000000000000000000000000000000bb".parse().unwrap();
        let account = trie
            .get_account(keccak(address), &mut UsedNodes::new(), &[])
            .unwrap()
            .unwrap();
        assert_eq!(account.balance, U256::from(0x40));
        assert_eq!(account.nonce, U256::from(2));
        assert_eq!(account.storage_root, EMPTY_BUFFER_HASH);
        assert_eq!(account.code_hash, EMPTY_STRING_HASH);
    }

    #[test]
    fn gzip_dumps_are_sniffed() {
        let json = r#"{"accounts": {"0x00000000000000000000000000000000000000aa": {"balance": "7"}}}"#;
        let mut encoder =
            flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(json.as_bytes()).unwrap();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&encoder.finish().unwrap()).unwrap();

        let trie = load_genesis_state(file.path()).unwrap();
        let address: Address = "00000000000000000000000000000000000000aa".parse().unwrap();
        assert!(trie
            .get_account(keccak(address), &mut UsedNodes::new(), &[])
            .unwrap()
            .is_some());
    }

    #[test]
    fn code_hash_mismatch_aborts() {
        let file = write_dump(
            r#"{"accounts": {"0x00000000000000000000000000000000000000aa": {
                "balance": "1",
                "code": "0x6000",
                "codeHash": "0x0000000000000000000000000000000000000000000000000000000000000001"
            }}}"#,
        );
        assert!(load_genesis_state(file.path()).is_err());
    }

    #[test]
    fn matching_code_hash_is_accepted() {
        let code_hash = keccak([0x60u8, 0x00]);
        let file = write_dump(&format!(
            r#"{{"accounts": {{"0x00000000000000000000000000000000000000aa": {{
                "balance": "1",
                "code": "0x6000",
                "codeHash": "{code_hash:#x}"
            }}}}}}"#
        ));
        let trie = load_genesis_state(file.path()).unwrap();
        let address: Address = "00000000000000000000000000000000000000aa".parse().unwrap();
        let account = trie
            .get_account(keccak(address), &mut UsedNodes::new(), &[])
            .unwrap()
            .unwrap();
        assert_eq!(account.code_hash, code_hash);
        assert!(account.has_code());
    }

    #[test]
    fn storage_is_rejected() {
        let file = write_dump(
            r#"{"accounts": {"0x00000000000000000000000000000000000000aa": {
                "balance": "1",
                "storage": {"0x01": "0x02"}
            }}}"#,
        );
        assert!(load_genesis_state(file.path()).is_err());
    }
}
