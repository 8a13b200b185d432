/// Paged time-series download for one measured parameter
///
/// The device streams history as notifications on the time-series
/// characteristic after a request command is written. Each notification is a
/// page:
/// - Byte 0: parameter id (echo of the request)
/// - Bytes 1-2: start index, 1-based, little-endian
/// - Byte 3: number of values in this page (0 terminates the stream)
/// - Bytes 4..: packed values, width depending on the parameter
use log::{debug, warn};
use std::time::Duration;
use tokio::sync::oneshot;

use crate::bluetooth::decoder::FieldDecoder;
use crate::bluetooth::transport::Transport;
use crate::bluetooth::uuids::{DEVICE_SERVICE, READ_TIME_SERIES, WRITE_CMD};
use crate::error::{Error, Result};
use crate::models::{Param, Sample};

const HISTORY_REQUEST: u8 = 0x82;
const FIRST_INDEX: u16 = 0x0001;
const LAST_INDEX: u16 = 0xffff;

/// Command asking for the whole history of `param`.
pub fn history_command(param: Param) -> [u8; 8] {
    let mut cmd = [HISTORY_REQUEST, param.id(), 0x00, 0x00, 0, 0, 0, 0];
    cmd[4..6].copy_from_slice(&FIRST_INDEX.to_le_bytes());
    cmd[6..8].copy_from_slice(&LAST_INDEX.to_le_bytes());
    cmd
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageStatus {
    /// Values were written, more pages follow.
    More,
    /// Zero-count page: the stream is complete.
    End,
}

/// Decodes one notification page of `param` into `dst`.
///
/// Values land at `start_index - 1` onwards. The written span is clamped to
/// `dst.len()` since the device may have recorded a new sample after the
/// total count was read. On a decode error, values decoded before the
/// failure stay written.
pub fn apply_page(param: Param, page: &[u8], dst: &mut [Sample]) -> Result<PageStatus> {
    let mut dec = FieldDecoder::new(page);
    let id = dec.read_u8()?;
    if id != param.id() {
        return Err(Error::ProtocolMismatch {
            got: id,
            want: param.id(),
        });
    }
    let start = dec.read_u16()?;
    let count = dec.read_u8()?;
    if count == 0 {
        return Ok(PageStatus::End);
    }
    let first = usize::from(start.checked_sub(1).ok_or(Error::InvalidStartIndex(start))?);
    let end = (first + usize::from(count)).min(dst.len());

    for sample in dst.iter_mut().take(end).skip(first) {
        dec.read_field(param, sample)?;
    }
    Ok(PageStatus::More)
}

/// Owned by the notification callback; reports the terminal outcome once.
struct PageSink {
    param: Param,
    samples: Vec<Sample>,
    done: Option<oneshot::Sender<Result<Vec<Sample>>>>,
}

impl PageSink {
    fn on_page(&mut self, page: &[u8]) {
        if self.done.is_none() {
            // Already finished, late pages are ignored
            return;
        }
        match apply_page(self.param, page, &mut self.samples) {
            Ok(PageStatus::More) => {}
            Ok(PageStatus::End) => self.finish(Ok(())),
            Err(e) => self.finish(Err(e)),
        }
    }

    fn finish(&mut self, outcome: Result<()>) {
        if let Some(done) = self.done.take() {
            let samples = std::mem::take(&mut self.samples);
            // The receiver is gone only if the fetch already gave up
            let _ = done.send(outcome.map(|()| samples));
        }
    }
}

/// Downloads the full history of `param` into `samples`
///
/// Only the field belonging to `param` is touched; the buffer is handed back
/// on success. Notifications are unsubscribed on every exit path. Waits at
/// most `wait` for the terminating page.
pub async fn read_param<T>(
    transport: &T,
    param: Param,
    samples: Vec<Sample>,
    wait: Duration,
) -> Result<Vec<Sample>>
where
    T: Transport + ?Sized,
{
    debug!("Requesting {} history ({} slots)", param, samples.len());
    transport
        .write_characteristic(DEVICE_SERVICE, WRITE_CMD, &history_command(param))
        .await?;

    let (tx, rx) = oneshot::channel();
    let mut sink = PageSink {
        param,
        samples,
        done: Some(tx),
    };
    let subscription = transport
        .subscribe(
            DEVICE_SERVICE,
            READ_TIME_SERIES,
            Box::new(move |page: &[u8]| sink.on_page(page)),
        )
        .await?;

    let outcome = tokio::time::timeout(wait, rx).await;
    let unsubscribed = transport.unsubscribe(subscription).await;
    if let Err(e) = &unsubscribed {
        warn!("Failed to stop {} notifications: {}", param, e);
    }

    let samples = match outcome {
        Ok(Ok(result)) => result?,
        Ok(Err(_)) => {
            return Err(Error::Transport(format!(
                "notification stream closed before {} history completed",
                param
            )))
        }
        Err(_) => {
            return Err(Error::Timeout {
                param,
                waited: wait,
            })
        }
    };
    unsubscribed?;

    debug!("Received {} history", param);
    Ok(samples)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bluetooth::mock::{page, MockTransport};
    use crate::error::DecodeError;

    fn co2_values(values: &[u16]) -> Vec<u8> {
        values.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    #[test]
    fn command_layout() {
        assert_eq!(
            history_command(Param::Co2),
            [0x82, 0x04, 0x00, 0x00, 0x01, 0x00, 0xff, 0xff]
        );
    }

    #[test]
    fn page_is_clamped_to_destination() {
        let values: Vec<u16> = (0..50).map(|i| 400 + i).collect();
        let raw = page(Param::Co2, 10, 50, &co2_values(&values));
        let mut dst = vec![Sample::default(); 20];

        assert_eq!(apply_page(Param::Co2, &raw, &mut dst).unwrap(), PageStatus::More);
        for (i, sample) in dst.iter().enumerate() {
            if i < 9 {
                assert_eq!(sample.co2, 0, "index {} must be untouched", i);
            } else {
                assert_eq!(sample.co2, 400 + (i as u16 - 9));
            }
        }
    }

    #[test]
    fn page_boundaries() {
        let mut dst = vec![Sample::default(); 20];

        // Last slot exactly
        let raw = page(Param::Co2, 20, 1, &co2_values(&[777]));
        apply_page(Param::Co2, &raw, &mut dst).unwrap();
        assert_eq!(dst[19].co2, 777);

        // One past the end writes nothing and does not fail
        let raw = page(Param::Co2, 21, 1, &co2_values(&[888]));
        assert_eq!(apply_page(Param::Co2, &raw, &mut dst).unwrap(), PageStatus::More);
        assert!(dst.iter().all(|s| s.co2 != 888));

        let raw = page(Param::Co2, 0, 1, &co2_values(&[999]));
        assert!(matches!(
            apply_page(Param::Co2, &raw, &mut dst),
            Err(Error::InvalidStartIndex(0))
        ));
    }

    #[test]
    fn zero_count_ends_stream() {
        let mut dst = vec![Sample::default(); 3];
        let raw = page(Param::Humidity, 4, 0, &[]);
        assert_eq!(apply_page(Param::Humidity, &raw, &mut dst).unwrap(), PageStatus::End);
    }

    #[test]
    fn mismatched_param_is_rejected() {
        let mut dst = vec![Sample::default(); 3];
        let raw = page(Param::Pressure, 1, 1, &[0x10, 0x27]);
        assert!(matches!(
            apply_page(Param::Temperature, &raw, &mut dst),
            Err(Error::ProtocolMismatch { got: 3, want: 1 })
        ));
    }

    #[test]
    fn truncated_page_keeps_partial_writes() {
        let mut dst = vec![Sample::default(); 3];
        // Claims three values but carries one and a half
        let raw = page(Param::Co2, 1, 3, &[0x90, 0x01, 0x20]);
        assert!(matches!(
            apply_page(Param::Co2, &raw, &mut dst),
            Err(Error::Decode(DecodeError::ShortBuffer { .. }))
        ));
        assert_eq!(dst[0].co2, 400);
        assert_eq!(dst[1].co2, 0);
    }

    #[tokio::test]
    async fn reads_all_pages() {
        let transport = MockTransport::new().with_pages(
            Param::Co2,
            vec![
                page(Param::Co2, 1, 2, &co2_values(&[400, 410])),
                page(Param::Co2, 3, 1, &co2_values(&[420])),
                page(Param::Co2, 4, 0, &[]),
            ],
        );

        let samples = read_param(
            &transport,
            Param::Co2,
            vec![Sample::default(); 3],
            Duration::from_secs(5),
        )
        .await
        .unwrap();

        let co2: Vec<u16> = samples.iter().map(|s| s.co2).collect();
        assert_eq!(co2, vec![400, 410, 420]);
        assert_eq!(transport.writes(), vec![history_command(Param::Co2).to_vec()]);
        assert_eq!(transport.unsubscribed(), 1);
    }

    #[tokio::test]
    async fn decode_failure_still_unsubscribes() {
        let transport = MockTransport::new().with_pages(
            Param::Temperature,
            vec![page(Param::Temperature, 1, 1, &[0x00, 0x40])],
        );

        let err = read_param(
            &transport,
            Param::Temperature,
            vec![Sample::default(); 1],
            Duration::from_secs(5),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, Error::Decode(DecodeError::NoData)));
        assert_eq!(transport.unsubscribed(), 1);
    }

    #[tokio::test]
    async fn mismatch_aborts_fetch() {
        let transport = MockTransport::new().with_pages(
            Param::Humidity,
            vec![page(Param::Pressure, 1, 1, &[0x10, 0x27])],
        );

        let err = read_param(
            &transport,
            Param::Humidity,
            vec![Sample::default(); 1],
            Duration::from_secs(5),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, Error::ProtocolMismatch { got: 3, want: 2 }));
        assert_eq!(transport.unsubscribed(), 1);
    }

    #[tokio::test]
    async fn silent_device_times_out() {
        // Pages without a terminator: the stream stays open and idle
        let transport = MockTransport::new().with_pages(
            Param::Co2,
            vec![page(Param::Co2, 1, 1, &co2_values(&[500]))],
        );

        let err = read_param(
            &transport,
            Param::Co2,
            vec![Sample::default(); 1],
            Duration::from_millis(50),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, Error::Timeout { param: Param::Co2, .. }));
        assert_eq!(transport.unsubscribed(), 1);
    }

    #[tokio::test]
    async fn rejected_command_never_subscribes() {
        let transport = MockTransport::new().failing_writes();

        let err = read_param(
            &transport,
            Param::Co2,
            vec![Sample::default(); 1],
            Duration::from_secs(5),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, Error::Transport(_)));
        assert_eq!(transport.unsubscribed(), 0);
    }

    #[tokio::test]
    async fn failed_subscription_is_a_transport_error() {
        let transport = MockTransport::new().failing_subscribe();

        let err = read_param(
            &transport,
            Param::Pressure,
            vec![Sample::default(); 1],
            Duration::from_secs(5),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, Error::Transport(_)));
        assert_eq!(transport.writes(), vec![history_command(Param::Pressure).to_vec()]);
        assert_eq!(transport.unsubscribed(), 0);
    }

    #[tokio::test]
    async fn stream_closed_before_end() {
        // One page, then the device drops the stream without a terminator
        let transport = MockTransport::new()
            .with_pages(
                Param::Co2,
                vec![page(Param::Co2, 1, 1, &co2_values(&[500]))],
            )
            .hanging_up();

        let err = read_param(
            &transport,
            Param::Co2,
            vec![Sample::default(); 2],
            Duration::from_secs(5),
        )
        .await
        .unwrap_err();

        match err {
            Error::Transport(msg) => assert!(msg.contains("closed"), "{}", msg),
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(transport.unsubscribed(), 1);
    }
}
