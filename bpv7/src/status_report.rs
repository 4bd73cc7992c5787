//! Administrative records: bundle status reports (RFC 9171 §6.1).

use crate::{
    cbor,
    cbor::decode::ArrayLen,
    creation_timestamp::CreationTimestamp,
    dtn_time::DtnTime,
    eid::Eid,
};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StatusReportError {
    #[error("Unknown administrative record type {0}")]
    UnknownRecordType(u64),

    #[error("Reserved status report reason code 255")]
    ReservedReasonCode,

    #[error(transparent)]
    InvalidEid(#[from] crate::eid::EidError),

    #[error(transparent)]
    InvalidCbor(#[from] cbor::decode::Error),
}

/// Reason codes attached to status reports.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusReportReason {
    #[default]
    NoInformation,
    LifetimeExpired,
    ForwardedOverUnidirectionalLink,
    TransmissionCanceled,
    DepletedStorage,
    DestinationUnavailable,
    NoRouteToDestination,
    NoTimelyContact,
    BlockUnintelligible,
    Unassigned(u64),
}

impl From<StatusReportReason> for u64 {
    fn from(value: StatusReportReason) -> Self {
        match value {
            StatusReportReason::NoInformation => 0,
            StatusReportReason::LifetimeExpired => 1,
            StatusReportReason::ForwardedOverUnidirectionalLink => 2,
            StatusReportReason::TransmissionCanceled => 3,
            StatusReportReason::DepletedStorage => 4,
            StatusReportReason::DestinationUnavailable => 5,
            StatusReportReason::NoRouteToDestination => 6,
            StatusReportReason::NoTimelyContact => 7,
            StatusReportReason::BlockUnintelligible => 8,
            StatusReportReason::Unassigned(v) => v,
        }
    }
}

impl TryFrom<u64> for StatusReportReason {
    type Error = StatusReportError;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(StatusReportReason::NoInformation),
            1 => Ok(StatusReportReason::LifetimeExpired),
            2 => Ok(StatusReportReason::ForwardedOverUnidirectionalLink),
            3 => Ok(StatusReportReason::TransmissionCanceled),
            4 => Ok(StatusReportReason::DepletedStorage),
            5 => Ok(StatusReportReason::DestinationUnavailable),
            6 => Ok(StatusReportReason::NoRouteToDestination),
            7 => Ok(StatusReportReason::NoTimelyContact),
            8 => Ok(StatusReportReason::BlockUnintelligible),
            255 => Err(StatusReportError::ReservedReasonCode),
            v => Ok(StatusReportReason::Unassigned(v)),
        }
    }
}

/// One asserted status, with the optional time of the event.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StatusAssertion(pub Option<DtnTime>);

/// The body of a bundle status report, referencing the subject bundle by
/// `(source, creation timestamp)`.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BundleStatusReport {
    pub received: Option<StatusAssertion>,
    pub forwarded: Option<StatusAssertion>,
    pub delivered: Option<StatusAssertion>,
    pub deleted: Option<StatusAssertion>,
    pub reason: StatusReportReason,
    pub source: Eid,
    pub timestamp: CreationTimestamp,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdministrativeRecord {
    BundleStatusReport(BundleStatusReport),
}

fn emit_assertion(encoder: &mut cbor::encode::Encoder, assertion: &Option<StatusAssertion>) {
    match assertion {
        Some(StatusAssertion(Some(time))) => {
            encoder.emit_array(2);
            encoder.emit_bool(true);
            encoder.emit_uint(time.millisecs());
        }
        Some(StatusAssertion(None)) => {
            encoder.emit_array(1);
            encoder.emit_bool(true);
        }
        None => {
            encoder.emit_array(1);
            encoder.emit_bool(false);
        }
    }
}

fn parse_assertion(
    decoder: &mut cbor::decode::Decoder,
) -> Result<Option<StatusAssertion>, StatusReportError> {
    let len = decoder.parse_array()?;
    let asserted = decoder.parse_bool()?;
    let mut time = None;
    match len {
        ArrayLen::Definite(n) => {
            if n > 1 {
                time = Some(DtnTime::new(decoder.parse_uint()?));
                for _ in 2..n {
                    decoder.skip_item()?;
                }
            }
        }
        ArrayLen::Indefinite => {
            if !decoder.at_break()? {
                time = Some(DtnTime::new(decoder.parse_uint()?));
                while !decoder.at_break()? {
                    decoder.skip_item()?;
                }
            }
        }
    }
    Ok(asserted.then_some(StatusAssertion(time)))
}

impl AdministrativeRecord {
    pub fn to_cbor(&self) -> Vec<u8> {
        let AdministrativeRecord::BundleStatusReport(report) = self;
        let mut encoder = cbor::encode::Encoder::new();
        encoder.emit_array(2);
        encoder.emit_uint(1);

        // [status-info, reason, source, [time, seq]]
        encoder.emit_array(4);
        encoder.emit_array(4);
        emit_assertion(&mut encoder, &report.received);
        emit_assertion(&mut encoder, &report.forwarded);
        emit_assertion(&mut encoder, &report.delivered);
        emit_assertion(&mut encoder, &report.deleted);
        encoder.emit_uint(report.reason.into());
        report.source.emit_cbor(&mut encoder);
        encoder.emit_array(2);
        encoder.emit_uint(report.timestamp.time.millisecs());
        encoder.emit_uint(report.timestamp.sequence);

        encoder.build()
    }

    pub fn from_cbor(data: &[u8]) -> Result<Self, StatusReportError> {
        let mut decoder = cbor::decode::Decoder::new(data);
        decoder.parse_array()?;
        match decoder.parse_uint()? {
            1 => {
                decoder.parse_array()?;
                decoder.parse_array()?;
                let received = parse_assertion(&mut decoder)?;
                let forwarded = parse_assertion(&mut decoder)?;
                let delivered = parse_assertion(&mut decoder)?;
                let deleted = parse_assertion(&mut decoder)?;
                let reason = decoder.parse_uint()?.try_into()?;
                let source = Eid::parse_cbor(&mut decoder)?;
                decoder.parse_array()?;
                let timestamp = CreationTimestamp::new(
                    DtnTime::new(decoder.parse_uint()?),
                    decoder.parse_uint()?,
                );

                Ok(AdministrativeRecord::BundleStatusReport(
                    BundleStatusReport {
                        received,
                        forwarded,
                        delivered,
                        deleted,
                        reason,
                        source,
                        timestamp,
                    },
                ))
            }
            n => Err(StatusReportError::UnknownRecordType(n)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let record = AdministrativeRecord::BundleStatusReport(BundleStatusReport {
            delivered: Some(StatusAssertion(Some(DtnTime::new(12345)))),
            reason: StatusReportReason::NoInformation,
            source: "dtn://n1/ping".parse().unwrap(),
            timestamp: CreationTimestamp::new(DtnTime::new(1000), 3),
            ..Default::default()
        });
        let data = record.to_cbor();
        assert_eq!(AdministrativeRecord::from_cbor(&data).unwrap(), record);
    }

    #[test]
    fn deletion_with_reason() {
        let record = AdministrativeRecord::BundleStatusReport(BundleStatusReport {
            deleted: Some(StatusAssertion(None)),
            reason: StatusReportReason::LifetimeExpired,
            source: "dtn://n2".parse().unwrap(),
            timestamp: CreationTimestamp::new(DtnTime::new(7), 0),
            ..Default::default()
        });
        let AdministrativeRecord::BundleStatusReport(parsed) =
            AdministrativeRecord::from_cbor(&record.to_cbor()).unwrap();
        assert_eq!(parsed.reason, StatusReportReason::LifetimeExpired);
        assert!(parsed.deleted.is_some());
        assert!(parsed.received.is_none());
    }

    #[test]
    fn unknown_record_type() {
        let mut encoder = cbor::encode::Encoder::new();
        encoder.emit_array(2);
        encoder.emit_uint(99);
        encoder.emit_uint(0);
        assert!(matches!(
            AdministrativeRecord::from_cbor(&encoder.build()),
            Err(StatusReportError::UnknownRecordType(99))
        ));
    }
}
