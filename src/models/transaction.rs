// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Response codes and the end-of-transaction result entity.
//!
//! The full Site-to-Site code table is carried even though this client only
//! ever emits three of them (`ConfirmTransaction`, `CancelTransaction`,
//! `BadChecksum`): servers are free to answer with any row of the table and
//! the result entity must round-trip them.

use core::fmt;
use std::{convert::TryFrom, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Site-to-Site response codes.
#[repr(u8)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum ResponseCode {
    #[default]
    Reserved = 0,
    PropertiesOk = 1,
    UnknownPropertyName = 230,
    IllegalPropertyValue = 233,
    MissingProperty = 234,
    ContinueTransaction = 10,
    FinishTransaction = 11,
    ConfirmTransaction = 12,
    TransactionFinished = 13,
    TransactionFinishedButDestinationFull = 14,
    CancelTransaction = 15,
    BadChecksum = 19,
    MoreData = 20,
    NoMoreData = 21,
    /* 22–249 reserved */
    PortNotInValidState = 250,
    PortsDestinationFull = 251,
    Unauthorized = 252,
    Abort = 253,
    UnrecognizedResponseCode = 254,
    EndOfStream = 255,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown site-to-site response code {0:#04x}")]
pub struct UnknownResponseCode(pub u8);

impl TryFrom<u8> for ResponseCode {
    type Error = UnknownResponseCode;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        use ResponseCode::*;
        Ok(match value {
            0 => Reserved,
            1 => PropertiesOk,
            230 => UnknownPropertyName,
            233 => IllegalPropertyValue,
            234 => MissingProperty,
            10 => ContinueTransaction,
            11 => FinishTransaction,
            12 => ConfirmTransaction,
            13 => TransactionFinished,
            14 => TransactionFinishedButDestinationFull,
            15 => CancelTransaction,
            19 => BadChecksum,
            20 => MoreData,
            21 => NoMoreData,
            250 => PortNotInValidState,
            251 => PortsDestinationFull,
            252 => Unauthorized,
            253 => Abort,
            254 => UnrecognizedResponseCode,
            255 => EndOfStream,
            other => return Err(UnknownResponseCode(other)),
        })
    }
}

impl From<ResponseCode> for u8 {
    fn from(code: ResponseCode) -> Self {
        code as u8
    }
}

impl fmt::Display for ResponseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}({})", *self as u8)
    }
}

/// JSON body of the `DELETE {transactionUrl}` response.
#[derive(Deserialize, Serialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct TransactionResultEntity {
    pub response_code: u8,
    pub flow_file_sent: u64,
    pub message: Option<String>,
}

/// What a finished transaction reports back to the caller.
#[derive(Debug, Clone)]
pub struct TransactionResult {
    pub response_code: ResponseCode,
    pub message: Option<String>,
    /// Flow-file count acknowledged by the server.
    pub flow_files_sent: u64,
    /// Frame bytes put on the wire by this client (before compression).
    pub bytes_sent: u64,
    pub duration: Duration,
}
