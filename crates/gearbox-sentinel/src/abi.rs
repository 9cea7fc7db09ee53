//! Raw contract-call codec for the Gearbox v3 read surface.
//!
//! Selectors come from the `sol!` interfaces below. Calldata is assembled as
//! selector + 32-byte words and return payloads are decoded positionally.
//! Every decoder is total: undersized input is reported as "no data" and
//! malformed offsets surface as [`AbiError`], never a panic.

use alloy::{
    primitives::{Address, Bytes, Selector, B256, U256},
    sol,
    sol_types::SolCall,
};
use thiserror::Error;

const WORD: usize = 32;
const ADDRESS_OFFSET: usize = WORD - 20;
const CREDIT_ACCOUNT_INFO_LEN: usize = 8 * WORD;

sol! {
    interface ICreditManagerV3 {
        function creditAccounts() external view returns (address[]);
        function creditAccountInfo(address creditAccount) external view returns (
            uint256 debt,
            uint256 cumulativeIndexLastUpdate,
            uint128 cumulativeQuotaInterest,
            uint128 quotaFees,
            uint256 enabledTokensMask,
            uint16 flags,
            uint64 lastDebtUpdate,
            address borrower
        );
        function pool() external view returns (address);
        function collateralTokenByMask(uint256 tokenMask) external view returns (
            address token,
            uint16 liquidationThreshold
        );
    }

    interface IPoolV3 {
        function asset() external view returns (address);
        function underlyingToken() external view returns (address);
    }

    interface IERC20 {
        function balanceOf(address account) external view returns (uint256);
        function symbol() external view returns (string);
        function decimals() external view returns (uint8);
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AbiError {
    #[error("read of {len} bytes at offset {at} exceeds payload of {size} bytes")]
    OutOfBounds { at: usize, len: usize, size: usize },

    #[error("value does not fit in {0}")]
    Overflow(&'static str),
}

/// Contract functions this tool knows how to call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Function {
    CreditAccounts,
    CreditAccountInfo,
    Pool,
    Asset,
    UnderlyingToken,
    CollateralTokenByMask,
    BalanceOf,
    Symbol,
    Decimals,
}

impl Function {
    fn interface(self) -> (&'static str, [u8; 4]) {
        fn of<C: SolCall>() -> (&'static str, [u8; 4]) {
            (C::SIGNATURE, C::SELECTOR)
        }
        match self {
            Self::CreditAccounts => of::<ICreditManagerV3::creditAccountsCall>(),
            Self::CreditAccountInfo => of::<ICreditManagerV3::creditAccountInfoCall>(),
            Self::Pool => of::<ICreditManagerV3::poolCall>(),
            Self::Asset => of::<IPoolV3::assetCall>(),
            Self::UnderlyingToken => of::<IPoolV3::underlyingTokenCall>(),
            Self::CollateralTokenByMask => of::<ICreditManagerV3::collateralTokenByMaskCall>(),
            Self::BalanceOf => of::<IERC20::balanceOfCall>(),
            Self::Symbol => of::<IERC20::symbolCall>(),
            Self::Decimals => of::<IERC20::decimalsCall>(),
        }
    }

    pub fn signature(self) -> &'static str {
        self.interface().0
    }

    pub fn selector(self) -> Selector {
        Selector::from(self.interface().1)
    }
}

/// A single read-only call: target, selector and at most one argument word.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractCall {
    pub target: Address,
    pub selector: Selector,
    pub argument: Option<B256>,
}

impl ContractCall {
    pub fn new(target: Address, function: Function) -> Self {
        Self {
            target,
            selector: function.selector(),
            argument: None,
        }
    }

    pub fn with_address(target: Address, function: Function, arg: Address) -> Self {
        Self {
            argument: Some(address_word(arg)),
            ..Self::new(target, function)
        }
    }

    pub fn with_uint(target: Address, function: Function, arg: U256) -> Self {
        Self {
            argument: Some(B256::from(arg)),
            ..Self::new(target, function)
        }
    }

    pub fn calldata(&self) -> Bytes {
        let mut out = Vec::with_capacity(4 + WORD);
        out.extend_from_slice(self.selector.as_slice());
        if let Some(word) = &self.argument {
            out.extend_from_slice(word.as_slice());
        }
        Bytes::from(out)
    }

    pub fn calldata_hex(&self) -> String {
        format!("0x{}", hex::encode(self.calldata()))
    }
}

/// Right-align an address in a 32-byte word.
pub fn address_word(addr: Address) -> B256 {
    let mut word = [0_u8; WORD];
    for (dst, src) in word.iter_mut().skip(ADDRESS_OFFSET).zip(addr.as_slice()) {
        *dst = *src;
    }
    B256::from(word)
}

fn slice_at(buf: &[u8], at: usize, len: usize) -> Result<&[u8], AbiError> {
    let oob = AbiError::OutOfBounds {
        at,
        len,
        size: buf.len(),
    };
    let end = at.checked_add(len).ok_or_else(|| oob.clone())?;
    buf.get(at..end).ok_or(oob)
}

fn word_at(buf: &[u8], at: usize) -> Result<U256, AbiError> {
    slice_at(buf, at, WORD).map(U256::from_be_slice)
}

fn address_at(buf: &[u8], at: usize) -> Result<Address, AbiError> {
    let word = slice_at(buf, at, WORD)?;
    let tail = slice_at(word, ADDRESS_OFFSET, 20)?;
    Ok(Address::from_slice(tail))
}

/// Narrow a word to a machine integer, `None` when any high limb is set.
pub fn small_uint(v: U256) -> Option<u64> {
    let [lo, a, b, c] = *v.as_limbs();
    (a == 0 && b == 0 && c == 0).then_some(lo)
}

fn word_to_usize(v: U256) -> Result<usize, AbiError> {
    small_uint(v)
        .and_then(|n| usize::try_from(n).ok())
        .ok_or(AbiError::Overflow("usize"))
}

/// Locate the tail of a dynamic return: `(start_of_data, length)`.
fn dynamic_tail(buf: &[u8]) -> Result<(usize, usize), AbiError> {
    let offset = word_to_usize(word_at(buf, 0)?)?;
    let len = word_to_usize(word_at(buf, offset)?)?;
    let start = offset
        .checked_add(WORD)
        .ok_or(AbiError::Overflow("usize"))?;
    Ok((start, len))
}

/// Decode an `address[]` return.
///
/// Payloads too short to hold an offset and a length word decode to an empty
/// list. Offsets or lengths pointing past the payload are errors.
pub fn decode_address_array(buf: &[u8]) -> Result<Vec<Address>, AbiError> {
    if buf.len() < 2 * WORD {
        return Ok(vec![]);
    }
    let (start, len) = dynamic_tail(buf)?;
    let bytes = len.checked_mul(WORD).ok_or(AbiError::Overflow("usize"))?;
    let body = slice_at(buf, start, bytes)?;
    body.chunks_exact(WORD).map(|w| address_at(w, 0)).collect()
}

/// Decode a `string` return. Invalid UTF-8 is replaced, never rejected.
///
/// Legacy tokens that return a bare `bytes32` are decoded as a NUL-trimmed
/// string.
pub fn decode_string(buf: &[u8]) -> Result<Option<String>, AbiError> {
    if buf.is_empty() {
        return Ok(None);
    }
    if buf.len() == WORD {
        let trimmed: Vec<u8> = buf.iter().copied().take_while(|b| *b != 0).collect();
        return Ok(Some(String::from_utf8_lossy(&trimmed).into_owned()));
    }
    if buf.len() < 2 * WORD {
        return Ok(None);
    }
    let (start, len) = dynamic_tail(buf)?;
    let raw = slice_at(buf, start, len)?;
    Ok(Some(String::from_utf8_lossy(raw).into_owned()))
}

/// The whole payload as one big-endian integer. Empty means no data.
///
/// Leading zero bytes carry no significance, so payloads longer than a word
/// decode as long as the value itself fits in 256 bits.
pub fn decode_uint(buf: &[u8]) -> Result<Option<U256>, AbiError> {
    if buf.is_empty() {
        return Ok(None);
    }
    let first = buf.iter().position(|b| *b != 0).unwrap_or(buf.len());
    let significant = buf.get(first..).unwrap_or_default();
    U256::try_from_be_slice(significant)
        .map(Some)
        .ok_or(AbiError::Overflow("uint256"))
}

/// First word as an address (`pool()`, `asset()`, ...).
pub fn decode_address(buf: &[u8]) -> Option<Address> {
    if buf.len() < WORD {
        return None;
    }
    address_at(buf, 0).ok()
}

/// `(address token, uint16 liquidationThreshold)`.
pub fn decode_collateral_token(buf: &[u8]) -> Result<Option<(Address, u16)>, AbiError> {
    if buf.len() < 2 * WORD {
        return Ok(None);
    }
    let token = address_at(buf, 0)?;
    let lt = small_uint(word_at(buf, WORD)?)
        .and_then(|n| u16::try_from(n).ok())
        .ok_or(AbiError::Overflow("uint16"))?;
    Ok(Some((token, lt)))
}

/// Snapshot returned by `creditAccountInfo(address)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreditAccountInfo {
    pub debt: U256,
    pub cumulative_index: U256,
    pub quota_interest: U256,
    pub quota_fees: U256,
    pub enabled_mask: U256,
    pub flags: U256,
    pub last_update_block: U256,
    pub borrower: Address,
}

impl CreditAccountInfo {
    /// Set bits of the enabled-token mask, ascending, across all 256 bits.
    pub fn enabled_bits(&self) -> impl Iterator<Item = usize> + '_ {
        (0..256_usize).filter(move |i| self.enabled_mask.bit(*i))
    }

    pub fn enabled_count(&self) -> usize {
        self.enabled_bits().count()
    }
}

/// Decode the fixed 8-word struct. Anything shorter than 256 bytes is no data.
pub fn decode_credit_account_info(buf: &[u8]) -> Option<CreditAccountInfo> {
    if buf.len() < CREDIT_ACCOUNT_INFO_LEN {
        return None;
    }
    let w = |i: usize| word_at(buf, i * WORD).ok();
    Some(CreditAccountInfo {
        debt: w(0)?,
        cumulative_index: w(1)?,
        quota_interest: w(2)?,
        quota_fees: w(3)?,
        enabled_mask: w(4)?,
        flags: w(5)?,
        last_update_block: w(6)?,
        borrower: address_at(buf, 7 * WORD).ok()?,
    })
}
