// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use anyhow::Result;
use s2s_client_rs::{
    client::transaction::transaction_path,
    models::transaction::{ResponseCode, TransactionResultEntity, UnknownResponseCode},
};

#[test]
fn test_response_code_round_trip() -> Result<()> {
    for code in [
        ResponseCode::Reserved,
        ResponseCode::PropertiesOk,
        ResponseCode::ContinueTransaction,
        ResponseCode::FinishTransaction,
        ResponseCode::ConfirmTransaction,
        ResponseCode::TransactionFinished,
        ResponseCode::TransactionFinishedButDestinationFull,
        ResponseCode::CancelTransaction,
        ResponseCode::BadChecksum,
        ResponseCode::MoreData,
        ResponseCode::NoMoreData,
        ResponseCode::UnknownPropertyName,
        ResponseCode::IllegalPropertyValue,
        ResponseCode::MissingProperty,
        ResponseCode::PortNotInValidState,
        ResponseCode::PortsDestinationFull,
        ResponseCode::Unauthorized,
        ResponseCode::Abort,
        ResponseCode::UnrecognizedResponseCode,
        ResponseCode::EndOfStream,
    ] {
        assert_eq!(ResponseCode::try_from(u8::from(code))?, code);
    }
    Ok(())
}

#[test]
fn test_the_three_emitted_codes() {
    assert_eq!(u8::from(ResponseCode::ConfirmTransaction), 12);
    assert_eq!(u8::from(ResponseCode::CancelTransaction), 15);
    assert_eq!(u8::from(ResponseCode::BadChecksum), 19);
}

#[test]
fn test_unknown_code_is_rejected() {
    assert_eq!(ResponseCode::try_from(42), Err(UnknownResponseCode(42)));
}

#[test]
fn test_result_entity_parses() -> Result<()> {
    let entity: TransactionResultEntity = serde_json::from_str(
        r#"{"responseCode": 12, "flowFileSent": 100, "message": "Transaction Finished"}"#,
    )?;
    assert_eq!(entity.response_code, 12);
    assert_eq!(entity.flow_file_sent, 100);
    assert_eq!(entity.message.as_deref(), Some("Transaction Finished"));

    // Servers may omit fields entirely.
    let sparse: TransactionResultEntity = serde_json::from_str("{}")?;
    assert_eq!(sparse.response_code, 0);
    assert_eq!(sparse.flow_file_sent, 0);
    assert!(sparse.message.is_none());
    Ok(())
}

#[test]
fn test_transaction_path_from_location_header() -> Result<()> {
    assert_eq!(
        transaction_path(
            "http://nifi.example:8080/nifi-api/data-transfer/input-ports/p/transactions/t1"
        )?,
        "/data-transfer/input-ports/p/transactions/t1"
    );
    assert_eq!(
        transaction_path("/nifi-api/data-transfer/input-ports/p/transactions/t1")?,
        "/data-transfer/input-ports/p/transactions/t1"
    );
    // Only the first occurrence is stripped.
    assert_eq!(
        transaction_path("/nifi-api/nifi-api/x")?,
        "/nifi-api/x"
    );
    Ok(())
}
