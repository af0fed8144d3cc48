use clap::{Parser, Subcommand};
use hex::FromHex;
use lazy_static::lazy_static;
use num_traits::Num;
use regex::Regex;
use std::ops::Deref;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

use divecomputer::Family;

#[derive(Error, Debug)]
pub enum HexError {
    #[error("invalid hex string '{0}'")]
    BadHex(String),
}

/// Byte string given as hex digits, optionally prefixed with `0x`.
#[derive(Debug, Clone)]
pub struct HexBytes(Vec<u8>);

impl Deref for HexBytes {
    type Target = Vec<u8>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl FromStr for HexBytes {
    type Err = HexError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        lazy_static! {
            static ref RE: Regex = Regex::new(r"^(?:0x)?((?:[0-9a-fA-F][0-9a-fA-F])*)$").unwrap();
        }

        let digits = RE
            .captures(input)
            .and_then(|c| c.get(1))
            .ok_or_else(|| HexError::BadHex(input.to_string()))?;

        Vec::from_hex(digits.as_str())
            .map(HexBytes)
            .map_err(|_| HexError::BadHex(input.to_string()))
    }
}

fn parse_with_radix<T>(input: &str) -> Result<T, T::FromStrRadixErr>
where
    T: Num,
    <T as Num>::FromStrRadixErr: std::error::Error + Send + Sync,
{
    if input.starts_with("0x") {
        T::from_str_radix(input.trim_start_matches("0x"), 16)
    } else if input.starts_with("0b") {
        T::from_str_radix(input.trim_start_matches("0b"), 2)
    } else {
        T::from_str_radix(input, 10)
    }
}

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
pub struct Cli {
    /// Skip sanity checks
    #[clap(long, short)]
    pub force: bool,

    /// enable debug output
    #[clap(long, short)]
    pub debug: bool,

    /// Serial device or 'auto'
    #[clap(long, short, default_value = "auto")]
    pub port: String,

    /// Use json-formatted output
    #[clap(long, short)]
    pub json: bool,

    /// Device family, see the `families` command
    #[clap(long, short = 'F')]
    pub family: Option<Family>,

    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List supported device families
    Families,

    /// Read the firmware version block
    Version,

    /// Read raw memory
    #[clap(visible_alias = "reada")]
    Read {
        #[clap(parse(try_from_str=parse_with_radix))]
        address: u32,
        #[clap(parse(try_from_str=parse_with_radix))]
        count: u32,
    },

    /// Write raw memory
    #[clap(visible_alias = "writea")]
    Write {
        #[clap(parse(try_from_str=parse_with_radix))]
        address: u32,
        #[clap(required = true, parse(try_from_str=parse_with_radix))]
        values: Vec<u8>,
    },

    /// Save a full memory image to a file
    Dump { file: PathBuf },

    /// Download dives newer than the fingerprint
    Dives {
        /// Fingerprint of the newest dive already downloaded
        #[clap(long)]
        fingerprint: Option<HexBytes>,
    },

    /// Show the handshake frame (Sensus Pro)
    Handshake,

    /// Set the sample interval in seconds (Sensus Pro)
    SetInterval {
        #[clap(parse(try_from_str=parse_with_radix))]
        interval: u8,
    },

    /// Clear the stored maximum depth (Vyper2)
    ResetMaxdepth,
}
