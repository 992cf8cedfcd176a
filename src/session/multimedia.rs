//! Per-connection multimedia ledger.
//!
//! A file arrives in three steps: the event upload registers the data id, the data upload
//! carries the bytes, the platform answers with `0x8800`. A data upload is only accepted for a
//! data id whose event is on record and not yet saved.

use std::collections::{BTreeMap, HashMap};

use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Local};

use crate::protocol::location::LocationBasic;
use crate::protocol::multimedia::{MultimediaDataBody, MultimediaEventBody};
use crate::protocol::PacketInfo;
use crate::{AppError, AppResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MultimediaStatus {
    EventReceived,
    FileSaved,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultimediaEvent {
    pub data_id: u32,
    pub media_type: u8,
    pub format: u8,
    pub event: u8,
    pub channel_id: u8,
    pub status: MultimediaStatus,
    pub file_size: Option<usize>,
    pub received_at: DateTime<Local>,
    pub saved_at: Option<DateTime<Local>>,
}

impl MultimediaEvent {
    fn new(body: &MultimediaEventBody) -> Self {
        MultimediaEvent {
            data_id: body.data_id,
            media_type: body.media_type,
            format: body.format,
            event: body.event,
            channel_id: body.channel_id,
            status: MultimediaStatus::EventReceived,
            file_size: None,
            received_at: Local::now(),
            saved_at: None,
        }
    }
}

/// A fully received file, handed to the media store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedUpload {
    pub terminal_id: String,
    pub data_id: u32,
    pub media_type: u8,
    pub format: u8,
    pub event: u8,
    pub channel_id: u8,
    pub location: LocationBasic,
    pub payload: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataAcceptance {
    /// Whole file present; answer with an empty retransmission list.
    Complete(CompletedUpload),
    /// Sub-package stored, more expected.
    Pending { data_id: u32 },
    /// Last sub-package arrived with gaps; answer with the missing package indexes.
    Retransmit { data_id: u32, missing: Vec<u16> },
}

#[derive(Debug)]
struct ChunkedUpload {
    data_id: u32,
    total: u16,
    header: MultimediaEventBody,
    location: LocationBasic,
    chunks: BTreeMap<u16, Bytes>,
}

/// Package indexes in `1..=total` not present in `received`.
pub fn missing_packets<'a>(total: u16, received: impl IntoIterator<Item = &'a u16>) -> Vec<u16> {
    let mut seen = vec![false; total as usize + 1];
    for index in received {
        if let Some(slot) = seen.get_mut(*index as usize) {
            *slot = true;
        }
    }
    (1..=total).filter(|i| !seen[*i as usize]).collect()
}

#[derive(Debug, Default)]
pub struct MultimediaLedger {
    events: HashMap<u32, MultimediaEvent>,
    in_flight: Option<ChunkedUpload>,
}

impl MultimediaLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an event upload. A repeated event for the same id starts over.
    pub fn record_event(&mut self, body: &MultimediaEventBody) -> &MultimediaEvent {
        let event = MultimediaEvent::new(body);
        self.events.insert(body.data_id, event);
        &self.events[&body.data_id]
    }

    pub fn get(&self, data_id: u32) -> Option<&MultimediaEvent> {
        self.events.get(&data_id)
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Accepts a data upload body, whole or sub-packaged.
    ///
    /// Fails with [`AppError::ProtocolSequenceViolation`] when no event upload announced the data
    /// id; the ledger is left untouched in that case.
    pub fn accept_data(
        &mut self,
        terminal_id: &str,
        packet: Option<PacketInfo>,
        body: &Bytes,
    ) -> AppResult<DataAcceptance> {
        match packet {
            Some(packet) if packet.total > 1 => self.accept_chunk(terminal_id, packet, body),
            _ => {
                let data = MultimediaDataBody::parse(body)?;
                self.expect_event(data.header.data_id)?;
                Ok(DataAcceptance::Complete(self.complete(
                    terminal_id,
                    data.header,
                    data.location,
                    data.payload,
                )))
            }
        }
    }

    fn expect_event(&self, data_id: u32) -> AppResult<()> {
        match self.events.get(&data_id) {
            Some(event) if event.status == MultimediaStatus::EventReceived => Ok(()),
            Some(_) => Err(AppError::ProtocolSequenceViolation(format!(
                "data upload for already saved multimedia id {}",
                data_id
            ))),
            None => Err(AppError::ProtocolSequenceViolation(format!(
                "data upload for multimedia id {} without event upload",
                data_id
            ))),
        }
    }

    fn accept_chunk(
        &mut self,
        terminal_id: &str,
        packet: PacketInfo,
        body: &Bytes,
    ) -> AppResult<DataAcceptance> {
        if packet.index == 1 {
            let data = MultimediaDataBody::parse(body)?;
            self.expect_event(data.header.data_id)?;
            let mut chunks = BTreeMap::new();
            chunks.insert(1, data.payload);
            self.in_flight = Some(ChunkedUpload {
                data_id: data.header.data_id,
                total: packet.total,
                header: data.header,
                location: data.location,
                chunks,
            });
        } else {
            let upload = self.in_flight.as_mut().ok_or_else(|| {
                AppError::ProtocolSequenceViolation(format!(
                    "multimedia sub-package {}/{} without a first package",
                    packet.index, packet.total
                ))
            })?;
            if packet.index == 0 || packet.index > upload.total {
                return Err(AppError::ProtocolSequenceViolation(format!(
                    "multimedia sub-package index {} outside 1..={}",
                    packet.index, upload.total
                )));
            }
            upload.chunks.insert(packet.index, body.clone());
        }

        let Some(upload) = self.in_flight.as_ref() else {
            return Err(AppError::IllegalStateError("no upload in flight".into()));
        };
        let missing = missing_packets(upload.total, upload.chunks.keys());
        if missing.is_empty() {
            let upload = self.in_flight.take().ok_or_else(|| {
                AppError::IllegalStateError("no upload in flight".into())
            })?;
            let mut payload = BytesMut::new();
            for chunk in upload.chunks.values() {
                payload.extend_from_slice(chunk);
            }
            return Ok(DataAcceptance::Complete(self.complete(
                terminal_id,
                upload.header,
                upload.location,
                payload.freeze(),
            )));
        }
        if packet.index == upload.total || upload.chunks.contains_key(&upload.total) {
            return Ok(DataAcceptance::Retransmit {
                data_id: upload.data_id,
                missing,
            });
        }
        Ok(DataAcceptance::Pending {
            data_id: upload.data_id,
        })
    }

    fn complete(
        &mut self,
        terminal_id: &str,
        header: MultimediaEventBody,
        location: LocationBasic,
        payload: Bytes,
    ) -> CompletedUpload {
        if let Some(event) = self.events.get_mut(&header.data_id) {
            event.status = MultimediaStatus::FileSaved;
            event.file_size = Some(payload.len());
            event.saved_at = Some(Local::now());
        }
        CompletedUpload {
            terminal_id: terminal_id.to_string(),
            data_id: header.data_id,
            media_type: header.media_type,
            format: header.format,
            event: header.event,
            channel_id: header.channel_id,
            location,
            payload,
        }
    }
}

#[cfg(test)]
mod tests {
    use bytes::{BufMut, BytesMut};

    use super::*;
    use crate::protocol::location::tests::location_block;

    fn event(data_id: u32) -> MultimediaEventBody {
        MultimediaEventBody {
            data_id,
            media_type: 0,
            format: 0,
            event: 1,
            channel_id: 1,
        }
    }

    fn data_body(data_id: u32, payload: &[u8]) -> Bytes {
        let mut buf = BytesMut::new();
        buf.put_u32(data_id);
        buf.put_slice(&[0, 0, 1, 1]);
        buf.put_slice(&location_block());
        buf.put_slice(payload);
        buf.freeze()
    }

    #[test]
    fn test_event_then_data_completes() {
        let mut ledger = MultimediaLedger::new();
        ledger.record_event(&event(5));
        let accepted = ledger
            .accept_data("T1", None, &data_body(5, &[0xFF, 0xD8, 1, 2]))
            .unwrap();
        let DataAcceptance::Complete(upload) = accepted else {
            panic!("expected a complete upload");
        };
        assert_eq!(upload.payload.as_ref(), &[0xFF, 0xD8, 1, 2]);
        assert_eq!(upload.terminal_id, "T1");
        let event = ledger.get(5).unwrap();
        assert_eq!(event.status, MultimediaStatus::FileSaved);
        assert_eq!(event.file_size, Some(4));
    }

    #[test]
    fn test_data_without_event_is_a_violation_and_creates_nothing() {
        let mut ledger = MultimediaLedger::new();
        let err = ledger
            .accept_data("T1", None, &data_body(9, b"x"))
            .unwrap_err();
        assert!(matches!(err, AppError::ProtocolSequenceViolation(_)));
        assert!(ledger.get(9).is_none());
        assert!(ledger.is_empty());
    }

    #[test]
    fn test_second_data_for_saved_event_is_a_violation() {
        let mut ledger = MultimediaLedger::new();
        ledger.record_event(&event(5));
        ledger.accept_data("T1", None, &data_body(5, b"x")).unwrap();
        assert!(ledger.accept_data("T1", None, &data_body(5, b"x")).is_err());
    }

    #[test]
    fn test_missing_packets() {
        assert_eq!(missing_packets(5, &[1, 2, 5]), vec![3, 4]);
        assert_eq!(missing_packets(3, &[1, 2, 3]), Vec::<u16>::new());
        assert_eq!(missing_packets(2, &[7]), vec![1, 2]);
    }

    #[test]
    fn test_chunked_upload_with_gap_requests_retransmission() {
        let mut ledger = MultimediaLedger::new();
        ledger.record_event(&event(3));
        let first = data_body(3, b"aa");
        let packet = |index| Some(PacketInfo { total: 3, index });

        assert_eq!(
            ledger.accept_data("T1", packet(1), &first).unwrap(),
            DataAcceptance::Pending { data_id: 3 }
        );
        assert_eq!(
            ledger
                .accept_data("T1", packet(3), &Bytes::from_static(b"cc"))
                .unwrap(),
            DataAcceptance::Retransmit {
                data_id: 3,
                missing: vec![2]
            }
        );
        let DataAcceptance::Complete(upload) = ledger
            .accept_data("T1", packet(2), &Bytes::from_static(b"bb"))
            .unwrap()
        else {
            panic!("expected completion after retransmission");
        };
        assert_eq!(upload.payload.as_ref(), b"aabbcc");
        assert_eq!(ledger.get(3).unwrap().status, MultimediaStatus::FileSaved);
    }

    #[test]
    fn test_continuation_without_first_package() {
        let mut ledger = MultimediaLedger::new();
        let result = ledger.accept_data(
            "T1",
            Some(PacketInfo { total: 2, index: 2 }),
            &Bytes::from_static(b"zz"),
        );
        assert!(matches!(result, Err(AppError::ProtocolSequenceViolation(_))));
    }
}
