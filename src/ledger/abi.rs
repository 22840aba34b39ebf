// src/ledger/abi.rs
//! Just enough of the Solidity ABI for the finding registry: `string`,
//! `bytes32` and `uint256` arguments, and the `Finding[]` return shape.

const WORD: usize = 32;

/// `recordFinding(string,string,bytes32,string)`
pub const RECORD_FINDING: [u8; 4] = [0x3a, 0x54, 0xa1, 0xa4];
/// `totalFindings()`
pub const TOTAL_FINDINGS: [u8; 4] = [0x0b, 0xbe, 0xe6, 0x63];
/// `getLatestFindings(uint256)`
pub const GET_LATEST_FINDINGS: [u8; 4] = [0x1c, 0x22, 0xce, 0xd2];
/// topic0 of `NewFinding(uint256,string,string,bytes32,string)`
pub const NEW_FINDING_TOPIC: &str =
    "0x02bb7deaa42cecf80e0c26804a7cd8941807ca7c0a620be818b84a1ee812e166";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Str(String),
    Bytes32([u8; 32]),
    Uint(u128),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("abi decode: {0}")]
pub struct AbiError(pub String);

fn uint_word(v: u128) -> [u8; WORD] {
    let mut w = [0u8; WORD];
    w[16..].copy_from_slice(&v.to_be_bytes());
    w
}

fn padded_len(n: usize) -> usize {
    n.div_ceil(WORD) * WORD
}

/// Selector followed by head/tail encoded arguments.
pub fn encode_call(selector: [u8; 4], args: &[Token]) -> Vec<u8> {
    let head_len = args.len() * WORD;
    let mut head = Vec::with_capacity(head_len);
    let mut tail = Vec::new();
    for arg in args {
        match arg {
            Token::Uint(v) => head.extend_from_slice(&uint_word(*v)),
            Token::Bytes32(b) => head.extend_from_slice(b),
            Token::Str(s) => {
                head.extend_from_slice(&uint_word((head_len + tail.len()) as u128));
                let bytes = s.as_bytes();
                tail.extend_from_slice(&uint_word(bytes.len() as u128));
                tail.extend_from_slice(bytes);
                tail.resize(tail.len() + padded_len(bytes.len()) - bytes.len(), 0);
            }
        }
    }
    let mut out = Vec::with_capacity(4 + head.len() + tail.len());
    out.extend_from_slice(&selector);
    out.extend_from_slice(&head);
    out.extend_from_slice(&tail);
    out
}

/// Bounds-checked view over returned data.
pub struct Reader<'a> {
    data: &'a [u8],
}

impl<'a> Reader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    fn word(&self, at: usize) -> Result<&'a [u8], AbiError> {
        at.checked_add(WORD)
            .and_then(|end| self.data.get(at..end))
            .ok_or_else(|| AbiError(format!("word at {at} past end ({} bytes)", self.data.len())))
    }

    pub fn uint(&self, at: usize) -> Result<u128, AbiError> {
        let w = self.word(at)?;
        if w[..16].iter().any(|b| *b != 0) {
            return Err(AbiError(format!("uint at {at} exceeds 128 bits")));
        }
        let mut lo = [0u8; 16];
        lo.copy_from_slice(&w[16..]);
        Ok(u128::from_be_bytes(lo))
    }

    pub fn offset(&self, at: usize) -> Result<usize, AbiError> {
        usize::try_from(self.uint(at)?).map_err(|_| AbiError(format!("offset at {at} too large")))
    }

    pub fn bytes32(&self, at: usize) -> Result<[u8; 32], AbiError> {
        let mut out = [0u8; 32];
        out.copy_from_slice(self.word(at)?);
        Ok(out)
    }

    /// String whose length word sits at `at`.
    pub fn string(&self, at: usize) -> Result<String, AbiError> {
        let len = self.offset(at)?;
        let start = at + WORD;
        let bytes = start
            .checked_add(len)
            .and_then(|end| self.data.get(start..end))
            .ok_or_else(|| AbiError(format!("string at {at} ({len} bytes) past end")))?;
        String::from_utf8(bytes.to_vec()).map_err(|e| AbiError(format!("string at {at}: {e}")))
    }
}

/// One decoded registry entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FindingTuple {
    pub category: String,
    pub summary: String,
    pub content_hash: [u8; 32],
    pub reference: String,
    pub timestamp: u128,
}

/// Decode a returned `(string,string,bytes32,string,uint256)[]`.
pub fn decode_findings(data: &[u8]) -> Result<Vec<FindingTuple>, AbiError> {
    let r = Reader::new(data);
    let array = r.offset(0)?;
    let n = r.offset(array)?;
    let items = array + WORD;
    if n > data.len() / WORD {
        return Err(AbiError(format!("array length {n} larger than payload")));
    }
    let mut out = Vec::with_capacity(n);
    for i in 0..n {
        let base = items + r.offset(items + i * WORD)?;
        out.push(FindingTuple {
            category: r.string(base + r.offset(base)?)?,
            summary: r.string(base + r.offset(base + WORD)?)?,
            content_hash: r.bytes32(base + 2 * WORD)?,
            reference: r.string(base + r.offset(base + 3 * WORD)?)?,
            timestamp: r.uint(base + 4 * WORD)?,
        });
    }
    Ok(out)
}

pub fn decode_hex(s: &str) -> Result<Vec<u8>, AbiError> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    hex::decode(s).map_err(|e| AbiError(format!("hex: {e}")))
}
