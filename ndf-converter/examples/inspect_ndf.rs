//! Inspect an NDF file: preamble metadata, per-channel message counts and
//! clock health

use ndf_converter::formats::NdfContainer;
use ndf_converter::{decode_all, BigEndianLayout, ClockModel, TimingConfig};
use std::collections::BTreeMap;
use std::path::PathBuf;

fn main() {
    env_logger::init();

    let paths: Vec<PathBuf> = std::env::args().skip(1).map(PathBuf::from).collect();
    if paths.is_empty() {
        eprintln!("usage: inspect_ndf <file.ndf>...");
        return;
    }

    for path in paths {
        println!("\n═══════════════════════════════════════");
        println!("Inspecting: {:?}", path);
        println!("═══════════════════════════════════════");

        let container = match NdfContainer::open::<BigEndianLayout>(&path) {
            Ok(c) => c,
            Err(e) => {
                println!("✗ Error: {}", e);
                continue;
            }
        };

        let meta = container.metadata();
        println!("Magic ok:      {}", meta.magic_ok);
        println!("Header values: {:?}", meta.header_values);
        println!("Created:       {}", meta.creation_label());
        println!("Creator:       {}", meta.creator.as_deref().unwrap_or("-"));
        println!("Data offset:   {}", meta.data_offset);

        let outcome = decode_all::<BigEndianLayout>(container.telemetry(), meta.data_offset);
        let mut counts: BTreeMap<u8, usize> = BTreeMap::new();
        for msg in &outcome.messages {
            *counts.entry(msg.channel_id).or_insert(0) += 1;
        }

        println!("\nMessages per channel:");
        println!("─────────────────────────");
        for (channel, count) in &counts {
            println!("  Channel {:2}: {:8} messages", channel, count);
        }
        println!("\nMalformed records: {}", outcome.errors.len());
        if let Some(offset) = outcome.truncated_at {
            println!("Truncated at offset {}", offset);
        }

        let clock = ClockModel::from_messages(&outcome.messages, &TimingConfig::default());
        println!(
            "Clock: {} segments, {} discontinuities{}",
            clock.segments().len(),
            clock.discontinuities(),
            if clock.is_synthetic() { " (no clock channel)" } else { "" }
        );
        match clock.span(&outcome.messages) {
            Some(seconds) => println!("Duration: {:.3} s", seconds),
            None => println!("Duration: no data"),
        }
    }
}
