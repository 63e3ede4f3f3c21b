// Multi-writer append against one term: disjoint reservations, one trip, clean layout.
use std::collections::BTreeMap;
use std::sync::Barrier;
use std::thread;

use termlog::core::frame::{
    BEGIN_FRAG_FLAG, DataHeader, END_FRAG_FLAG, TERM_MIN_LENGTH, UNFRAGMENTED,
};
use termlog::core::header::HeaderWriter;
use termlog::core::log::LogBuffers;
use termlog::core::reader;
use termlog::core::supplier::DefaultReservedValue;
use termlog::core::tail::AppendResult;
use termlog::core::validate::scan_term;

const TERM_ID: i32 = 11;
const WRITERS: u32 = 6;

#[derive(Default)]
struct WriterReport {
    appended: u32,
    tripped: usize,
    failed: usize,
}

fn message(writer: u32, seq: u32) -> Vec<u8> {
    // Lengths vary per message so frames straddle alignment boundaries.
    let extra = ((writer as usize * 7) + seq as usize) % 90;
    let mut payload = Vec::with_capacity(8 + extra);
    payload.extend_from_slice(&writer.to_le_bytes());
    payload.extend_from_slice(&seq.to_le_bytes());
    payload.resize(8 + extra, writer as u8);
    payload
}

#[test]
fn concurrent_writers_fill_term_without_overlap() {
    let log = LogBuffers::anonymous(TERM_MIN_LENGTH, TERM_ID).expect("log");
    let header = HeaderWriter::new(&DataHeader::template(9, 10, TERM_ID));
    let barrier = Barrier::new(WRITERS as usize);

    let reports: Vec<WriterReport> = thread::scope(|scope| {
        let handles: Vec<_> = (0..WRITERS)
            .map(|writer| {
                let appender = log.appender(0).expect("appender");
                let header = &header;
                let barrier = &barrier;
                scope.spawn(move || {
                    let mut report = WriterReport::default();
                    barrier.wait();
                    loop {
                        let payload = message(writer, report.appended);
                        match appender
                            .append_unfragmented_message(header, &payload, &DefaultReservedValue)
                            .expect("append")
                        {
                            AppendResult::Appended { term_id, term_offset } => {
                                assert_eq!(term_id, TERM_ID);
                                assert!(term_offset as usize <= TERM_MIN_LENGTH);
                                report.appended += 1;
                            }
                            AppendResult::Tripped { term_id } => {
                                assert_eq!(term_id, TERM_ID);
                                report.tripped += 1;
                                break;
                            }
                            AppendResult::Failed { term_id } => {
                                assert_eq!(term_id, TERM_ID);
                                report.failed += 1;
                                break;
                            }
                        }
                    }
                    report
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().expect("join")).collect()
    });

    let tripped: usize = reports.iter().map(|r| r.tripped).sum();
    assert!(tripped <= 1, "at most one writer pads the term end");

    let appender = log.appender(0).expect("appender");
    assert_eq!(appender.tail_offset(), TERM_MIN_LENGTH);

    let summary = scan_term(log.term_buffer(0), TERM_MIN_LENGTH, TERM_ID).expect("scan");
    assert_eq!(summary.total_bytes(), TERM_MIN_LENGTH);
    assert!(summary.padding_frames <= 1);
    assert_eq!(summary.padding_frames, tripped);
    let appended_total: u32 = reports.iter().map(|r| r.appended).sum();
    assert_eq!(summary.data_frames, appended_total as usize);

    let mut seen: BTreeMap<u32, Vec<u32>> = BTreeMap::new();
    let outcome = reader::read(log.term_buffer(0), 0, usize::MAX, |frame| {
        assert_eq!(frame.header().flags, UNFRAGMENTED);
        assert_eq!(frame.header().session_id, 9);
        assert_eq!(frame.header().stream_id, 10);
        let payload = frame.payload();
        let writer = u32::from_le_bytes(payload[0..4].try_into().expect("writer"));
        let seq = u32::from_le_bytes(payload[4..8].try_into().expect("seq"));
        assert_eq!(payload, message(writer, seq));
        seen.entry(writer).or_default().push(seq);
    })
    .expect("read");
    assert_eq!(outcome.offset, TERM_MIN_LENGTH);

    for (writer, report) in reports.iter().enumerate() {
        let seqs = seen.remove(&(writer as u32)).unwrap_or_default();
        let expected: Vec<u32> = (0..report.appended).collect();
        assert_eq!(seqs, expected, "writer {writer} messages out of order or missing");
    }
}

#[test]
fn concurrent_claims_commit_independently() {
    let log = LogBuffers::anonymous(TERM_MIN_LENGTH, TERM_ID).expect("log");
    let header = HeaderWriter::new(&DataHeader::template(1, 1, TERM_ID));
    let per_writer = 200u32;

    thread::scope(|scope| {
        for writer in 0..4u32 {
            let appender = log.appender(0).expect("appender");
            let header = &header;
            scope.spawn(move || {
                let mut claim = termlog::core::claim::BufferClaim::new();
                for seq in 0..per_writer {
                    let result = appender.claim(header, 8, &mut claim);
                    assert!(result.is_appended());
                    claim.put_bytes(0, &writer.to_le_bytes()).expect("writer");
                    claim.put_bytes(4, &seq.to_le_bytes()).expect("seq");
                    if seq % 5 == 0 {
                        claim.abort();
                    } else {
                        claim.commit();
                    }
                }
            });
        }
    });

    let appender = log.appender(0).expect("appender");
    let tail = appender.tail_offset();
    assert_eq!(tail, 4 * per_writer as usize * 64);
    let summary = scan_term(log.term_buffer(0), tail, TERM_ID).expect("scan");
    assert_eq!(summary.padding_frames, 4 * (per_writer as usize / 5));
    assert_eq!(summary.data_frames, 4 * per_writer as usize - summary.padding_frames);

    let outcome = reader::read(log.term_buffer(0), 0, usize::MAX, |frame| {
        let payload = frame.payload();
        let seq = u32::from_le_bytes(payload[4..8].try_into().expect("seq"));
        assert_ne!(seq % 5, 0, "aborted claims are skipped by readers");
    })
    .expect("read");
    assert_eq!(outcome.fragments_read, summary.data_frames);
    assert_eq!(outcome.offset, tail);
}

const FRAGMENT_PAYLOAD: usize = 200;
const FRAGMENTED_MESSAGE: usize = 700;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Kind {
    Fragmented,
    Unfragmented,
    Claimed,
}

fn kind_for(seq: u32) -> Kind {
    match seq % 3 {
        0 => Kind::Fragmented,
        1 => Kind::Unfragmented,
        _ => Kind::Claimed,
    }
}

#[test]
fn fragment_runs_stay_contiguous_under_mixed_writers() {
    let log = LogBuffers::anonymous(TERM_MIN_LENGTH, TERM_ID).expect("log");
    let header = HeaderWriter::new(&DataHeader::template(4, 5, TERM_ID));
    let barrier = Barrier::new(WRITERS as usize);

    let fragmented_counts: Vec<usize> = thread::scope(|scope| {
        let handles: Vec<_> = (0..WRITERS)
            .map(|writer| {
                let appender = log.appender(0).expect("appender");
                let header = &header;
                let barrier = &barrier;
                scope.spawn(move || {
                    let marker = writer as u8 + 1;
                    let mut claim = termlog::core::claim::BufferClaim::new();
                    let mut fragmented = 0usize;
                    barrier.wait();
                    for seq in 0u32.. {
                        let kind = kind_for(seq);
                        let result = match kind {
                            Kind::Fragmented => appender
                                .append_fragmented_message(
                                    header,
                                    &[marker; FRAGMENTED_MESSAGE],
                                    FRAGMENT_PAYLOAD,
                                    &DefaultReservedValue,
                                )
                                .expect("fragmented"),
                            Kind::Unfragmented => appender
                                .append_unfragmented_message(header, &[marker; 48], &DefaultReservedValue)
                                .expect("unfragmented"),
                            Kind::Claimed => {
                                let result = appender.claim(header, 24, &mut claim);
                                if claim.is_active() {
                                    claim.put_bytes(0, &[marker; 24]).expect("put");
                                    claim.commit();
                                }
                                result
                            }
                        };
                        if !result.is_appended() {
                            break;
                        }
                        if kind == Kind::Fragmented {
                            fragmented += 1;
                        }
                    }
                    fragmented
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().expect("join")).collect()
    });

    // (owner, next expected offset, bytes so far) of the run being read.
    let mut open_run: Option<(u8, usize, usize)> = None;
    let mut runs_per_writer = vec![0usize; WRITERS as usize];
    let outcome = reader::read(log.term_buffer(0), 0, usize::MAX, |frame| {
        let payload = frame.payload();
        let owner = payload[0];
        assert!(payload.iter().all(|byte| *byte == owner), "frame mixes writers");
        let flags = frame.header().flags;
        let aligned = (frame.header().frame_length as usize).next_multiple_of(32);

        match open_run.take() {
            Some((run_owner, expected_offset, bytes)) => {
                assert_eq!(frame.term_offset(), expected_offset, "gap inside a fragment run");
                assert_eq!(owner, run_owner, "foreign frame inside a fragment run");
                assert_eq!(flags & BEGIN_FRAG_FLAG, 0);
                let bytes = bytes + payload.len();
                if flags & END_FRAG_FLAG != 0 {
                    assert_eq!(bytes, FRAGMENTED_MESSAGE);
                    runs_per_writer[owner as usize - 1] += 1;
                } else {
                    assert_eq!(flags, 0);
                    open_run = Some((run_owner, frame.term_offset() + aligned, bytes));
                }
            }
            None if flags == UNFRAGMENTED => {}
            None => {
                assert_eq!(flags, BEGIN_FRAG_FLAG, "run must open with BEGIN");
                open_run = Some((owner, frame.term_offset() + aligned, payload.len()));
            }
        }
    })
    .expect("read");
    assert!(open_run.is_none(), "fragment run left unterminated");
    assert_eq!(outcome.offset, TERM_MIN_LENGTH);
    assert_eq!(runs_per_writer, fragmented_counts);

    let summary = scan_term(log.term_buffer(0), TERM_MIN_LENGTH, TERM_ID).expect("scan");
    assert_eq!(summary.total_bytes(), TERM_MIN_LENGTH);
    assert!(summary.padding_frames <= 1);
}
