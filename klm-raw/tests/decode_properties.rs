#![allow(
    clippy::cast_possible_truncation,
    clippy::uninlined_format_args,
    clippy::unreadable_literal
)]
use std::collections::HashMap;
use std::convert::Infallible;

use klm_core::{ElectronicsId, EmptyChannelMap, HitTiming, ModuleId};
use klm_raw::event::BKLM_NODE_BASE;
use klm_raw::{
    build_buffer, merge_diagnostics, BufferLocation, CalibrationConfig, CopperRecord,
    DecodedEvent, HitDecoder, HitFields, MultiplicityTable, RawEvent, RawHitWord,
};

// RPC word pair with the given position and TDC.
fn rpc(lane: u8, axis: u8, channel: u8, ctime: u16, tdc: u16) -> RawHitWord {
    HitFields {
        ctime,
        channel,
        axis,
        lane,
        flag: 1,
        tdc,
        ..HitFields::default()
    }
    .encode()
}

fn scint(lane: u8, axis: u8, channel: u8, ctime: u16) -> RawHitWord {
    HitFields {
        ctime,
        channel,
        axis,
        lane,
        flag: 2,
        ..HitFields::default()
    }
    .encode()
}

fn zero_sector_location(config: &CalibrationConfig) -> BufferLocation {
    BufferLocation::new(0, 0, 0, config).with_sector(0)
}

#[test]
fn end_to_end_single_rpc_hit() {
    let config = CalibrationConfig::uncalibrated();
    let elect = ElectronicsId::pack(0, 0, 10, 0, 3);
    let module = ModuleId::new(0, 2, 9, 0, 3, 3).unwrap();
    let mut map = HashMap::new();
    map.insert(elect, module);

    let decoder = HitDecoder::new(config.clone(), map);
    let mut scratch = MultiplicityTable::new();
    let mut out = DecodedEvent::new(0);
    let buffer = build_buffer(&[rpc(10, 0, 3, 50, 600)], 0);

    decoder.decode_buffer(
        &buffer,
        zero_sector_location(&config),
        0,
        &mut scratch,
        &mut out,
    );

    assert_eq!(out.hits.len(), 1);
    let hit = &out.hits[0];
    assert!(hit.is_rpc());
    assert!(hit.is_mapped());
    assert_eq!(hit.electronics_id, elect);
    assert_eq!(hit.module_id, Some(module));
    assert_eq!(hit.raw_ctime, 50);
    assert_eq!(hit.tdc, 600);
    assert_eq!(hit.calibrated_time, 600);
    // |600 - 312| is far outside the 50 ns window
    assert_eq!(hit.timing, HitTiming::Background);

    // Same hit with the nominal moved next to it is prompt.
    let mut near = config.clone();
    near.rpc_nominal = 590;
    let decoder = HitDecoder::new(near, decoder.channel_map().clone());
    let mut out = DecodedEvent::new(0);
    decoder.decode_buffer(
        &buffer,
        zero_sector_location(&config),
        0,
        &mut scratch,
        &mut out,
    );
    assert_eq!(out.hits[0].timing, HitTiming::Prompt);
}

#[test]
fn rpc_tdc_100_with_zero_trigger_and_offset() {
    let config = CalibrationConfig::uncalibrated();
    let decoder = HitDecoder::new(config.clone(), EmptyChannelMap);
    let mut scratch = MultiplicityTable::new();
    let mut out = DecodedEvent::new(0);
    let buffer = build_buffer(&[rpc(12, 1, 40, 0, 100)], 0);
    decoder.decode_buffer(
        &buffer,
        zero_sector_location(&config),
        0,
        &mut scratch,
        &mut out,
    );
    assert_eq!(out.hits[0].calibrated_time, 100);
}

#[test]
fn unmapped_hits_are_emitted_and_counted() {
    let config = CalibrationConfig::belle2_defaults();
    let decoder = HitDecoder::new(config.clone(), HashMap::<ElectronicsId, ModuleId>::new());
    let mut scratch = MultiplicityTable::new();
    let mut out = DecodedEvent::new(0);
    let buffer = build_buffer(
        &[rpc(8, 0, 1, 0, 10), scint(2, 1, 7, 3), rpc(20, 1, 44, 0, 900)],
        0,
    );
    decoder.decode_buffer(
        &buffer,
        zero_sector_location(&config),
        1234,
        &mut scratch,
        &mut out,
    );

    assert_eq!(out.hits.len(), 3);
    assert!(out.hits.iter().all(|h| !h.is_mapped() && h.module_id.is_none()));
    assert_eq!(out.diagnostics.unmapped_hits, 3);
    assert_eq!(out.diagnostics.mapped_hits, 0);
}

#[test]
fn calibrated_time_always_below_1024() {
    let config = CalibrationConfig::belle2_defaults();
    let decoder = HitDecoder::new(config.clone(), EmptyChannelMap);
    let mut scratch = MultiplicityTable::new();

    for sector in 0..16u8 {
        for &trigger in &[0u32, 8, 1000, 0x3FF_FFF8] {
            let mut out = DecodedEvent::new(0);
            let hits: Vec<RawHitWord> = [0u16, 1, 7, 511, 1023, 2047]
                .iter()
                .enumerate()
                .flat_map(|(i, &t)| {
                    [
                        rpc(8 + i as u8, 0, 1, t, t & 0x7FF),
                        scint(1, 1, i as u8, t.wrapping_mul(37)),
                    ]
                })
                .collect();
            let buffer = build_buffer(&hits, 0);
            let location = BufferLocation::new(0, 0, 0, &config).with_sector(sector);
            decoder.decode_buffer(&buffer, location, trigger, &mut scratch, &mut out);

            assert_eq!(out.hits.len(), hits.len());
            for hit in &out.hits {
                assert!(hit.calibrated_time < 1024, "{:?}", hit);
                assert!(hit.raw_time < 1024, "{:?}", hit);
            }
        }
    }
}

#[test]
fn multiplicity_counts_every_entry_on_a_channel() {
    let config = CalibrationConfig::uncalibrated();
    let decoder = HitDecoder::new(config.clone(), EmptyChannelMap);
    let mut scratch = MultiplicityTable::new();
    let mut out = DecodedEvent::new(0);
    let buffer = build_buffer(
        &[
            rpc(10, 0, 3, 1, 100),
            rpc(10, 0, 3, 2, 110),
            rpc(10, 1, 3, 3, 120),
            rpc(10, 0, 3, 4, 130),
            scint(2, 0, 3, 5),
        ],
        0,
    );
    decoder.decode_buffer(
        &buffer,
        zero_sector_location(&config),
        0,
        &mut scratch,
        &mut out,
    );

    let mults: Vec<u16> = out.hits.iter().map(|h| h.multiplicity).collect();
    assert_eq!(mults, vec![3, 3, 1, 3, 1]);
    assert_eq!(
        out.hits.iter().filter(|h| h.is_single_entry()).count(),
        2
    );
    assert_eq!(out.diagnostics.multi_entry_hits, 3);
}

#[test]
fn nonzero_trailer_skips_whole_buffer() {
    let config = CalibrationConfig::uncalibrated();
    let decoder = HitDecoder::new(config.clone(), EmptyChannelMap);
    let mut scratch = MultiplicityTable::new();
    let mut out = DecodedEvent::new(0);
    let mut buffer = build_buffer(&[rpc(10, 0, 3, 50, 600), rpc(11, 0, 3, 50, 600)], 0);
    *buffer.last_mut().unwrap() = 0x0010_0001;

    decoder.decode_buffer(
        &buffer,
        zero_sector_location(&config),
        0,
        &mut scratch,
        &mut out,
    );

    assert!(out.hits.is_empty());
    assert!(out.buffers.is_empty());
    assert_eq!(out.diagnostics.framing_errors, 1);
}

#[test]
fn even_length_buffer_is_a_framing_error_not_fatal() {
    let config = CalibrationConfig::belle2_defaults();
    let decoder = HitDecoder::new(config, EmptyChannelMap);
    let mut scratch = MultiplicityTable::new();

    let good = build_buffer(&[rpc(10, 0, 3, 50, 600)], 0);
    let mut even = good.clone();
    even.pop();

    let event = RawEvent::new(3).with_copper(
        CopperRecord::new(BKLM_NODE_BASE, 0)
            .with_buffer(0, even)
            .with_buffer(1, good),
    );
    let decoded = decoder.decode_event(&event, &mut scratch);
    assert_eq!(decoded.hits.len(), 1);
    assert_eq!(decoded.diagnostics.framing_errors, 1);
    assert_eq!(decoded.buffers.len(), 1);
}

#[test]
fn multiplicity_does_not_leak_between_events() {
    let decoder = HitDecoder::new(CalibrationConfig::belle2_defaults(), EmptyChannelMap);
    let mut scratch = MultiplicityTable::new();

    let busy = RawEvent::new(1).with_copper(CopperRecord::new(BKLM_NODE_BASE, 0).with_buffer(
        0,
        build_buffer(
            &[
                rpc(10, 0, 3, 1, 100),
                rpc(10, 0, 3, 2, 100),
                rpc(10, 0, 3, 3, 100),
            ],
            0,
        ),
    ));
    let quiet = RawEvent::new(2).with_copper(
        CopperRecord::new(BKLM_NODE_BASE, 0)
            .with_buffer(0, build_buffer(&[rpc(10, 0, 3, 1, 100)], 0)),
    );

    let first = decoder.decode_event(&busy, &mut scratch);
    let second = decoder.decode_event(&quiet, &mut scratch);
    assert!(first.hits.iter().all(|h| h.multiplicity == 3));
    assert_eq!(second.hits.len(), 1);
    assert_eq!(second.hits[0].multiplicity, 1);
}

#[test]
fn legacy_ctime_only_for_old_experiments() {
    let trigger_ticks = 100u32;
    let event = RawEvent::new(1).with_copper(
        CopperRecord::new(BKLM_NODE_BASE, trigger_ticks)
            .with_buffer(0, build_buffer(&[scint(1, 0, 4, 90)], 0)),
    );
    let mut scratch = MultiplicityTable::new();

    let old = HitDecoder::new(CalibrationConfig::uncalibrated().with_experiment(2), EmptyChannelMap);
    let new = HitDecoder::new(CalibrationConfig::uncalibrated().with_experiment(8), EmptyChannelMap);

    let old_hit = old.decode_event(&event, &mut scratch).hits[0];
    let new_hit = new.decode_event(&event, &mut scratch).hits[0];
    assert_eq!(old_hit.ctime, 60);
    assert_eq!(new_hit.ctime, 90);
    assert_eq!(old_hit.raw_ctime, new_hit.raw_ctime);
    // 60 ticks vs trigger 100 ticks: -320 ns -> 704
    assert_eq!(old_hit.raw_time, 704);
    assert_eq!(new_hit.raw_time, 944);
}

fn sample_events() -> Vec<RawEvent> {
    (0..64u32)
        .map(|n| {
            let mut event = RawEvent::new(n);
            for copper in 0..4u32 {
                let mut record = CopperRecord::new(BKLM_NODE_BASE + copper, n * 13 + copper);
                for finesse in 0..4usize {
                    let hits: Vec<RawHitWord> = (0..(n % 5) as u8)
                        .map(|k| {
                            if k % 2 == 0 {
                                rpc(8 + k, k & 1, k % 3, n as u16, (n * 7 + u32::from(k)) as u16)
                            } else {
                                scint(1 + k % 2, 0, k, (n * 3) as u16)
                            }
                        })
                        .collect();
                    record = record.with_buffer(finesse, build_buffer(&hits, (n & 0xFF) as u16));
                }
                event = event.with_copper(record);
            }
            event
        })
        .collect()
}

#[test]
fn parallel_decode_matches_sequential() {
    let decoder = HitDecoder::new(CalibrationConfig::belle2_defaults(), EmptyChannelMap);
    let events = sample_events();

    let mut scratch = MultiplicityTable::new();
    let sequential: Vec<DecodedEvent> = events
        .iter()
        .map(|e| decoder.decode_event(e, &mut scratch))
        .collect();
    let parallel = decoder.decode_events_parallel(&events);

    assert_eq!(sequential, parallel);
    let totals = merge_diagnostics(&parallel);
    assert_eq!(totals.events, 64);
    assert_eq!(totals, merge_diagnostics(&sequential));
    assert!(totals.rpc_hits > 0 && totals.scint_hits > 0);
}

#[test]
fn decode_stream_passes_events_and_errors_through() {
    let decoder = HitDecoder::new(CalibrationConfig::belle2_defaults(), EmptyChannelMap);
    let events = sample_events();

    let ok: Vec<DecodedEvent> = decoder
        .decode_stream(events.iter().cloned().map(Ok::<_, Infallible>))
        .map(|r| r.unwrap())
        .collect();
    assert_eq!(ok.len(), events.len());
    assert_eq!(ok[7].event_number, 7);

    let source = vec![Ok(events[3].clone()), Err("truncated"), Ok(events[4].clone())];
    let results: Vec<_> = decoder.decode_stream(source).collect();
    assert_eq!(results.len(), 3);
    assert_eq!(results[0].as_ref().unwrap().event_number, 3);
    assert_eq!(results[1], Err("truncated"));
    assert_eq!(results[2].as_ref().unwrap().event_number, 4);
}
