//! Plain-text report of the configuration and the collected statistics.

use std::io::{self, Write};

use crate::commons::SystemSpec;
use crate::stats::CoreStats;

pub fn write_report<W: Write>(
    out: &mut W,
    prefix: &str,
    spec: &SystemSpec,
    stats: &[CoreStats],
) -> io::Result<()> {
    writeln!(out, "Simulation Parameters:")?;
    writeln!(out, "Trace Prefix: {prefix}")?;
    writeln!(out, "Set Index Bits: {}", spec.set_bits)?;
    writeln!(out, "Associativity: {}", spec.assoc)?;
    writeln!(out, "Block Bits: {}", spec.block_bits)?;
    writeln!(out, "Block Size (Bytes): {}", spec.block_bytes())?;
    writeln!(out, "Number of Sets: {}", spec.num_sets())?;
    writeln!(out, "Cache Size (KB per core): {}", spec.cache_kb())?;
    writeln!(out, "MESI Protocol: Enabled")?;
    writeln!(out, "Write Policy: Write-back, Write-allocate")?;
    writeln!(out, "Replacement Policy: LRU")?;
    writeln!(out, "Bus: Central snooping bus")?;
    writeln!(out)?;

    let mut total_tx = 0u64;
    let mut total_traffic = 0u64;
    for (c, st) in stats.iter().enumerate() {
        writeln!(out, "Core {c} Statistics:")?;
        writeln!(out, "Total Instructions: {}", st.instr)?;
        writeln!(out, "Total Reads: {}", st.reads)?;
        writeln!(out, "Total Writes: {}", st.writes)?;
        writeln!(out, "Total Execution Cycles: {}", st.execution_cycles)?;
        writeln!(out, "Idle Cycles: {}", st.idle)?;
        writeln!(out, "Cache Misses: {}", st.misses)?;
        writeln!(out, "Cache Miss Rate: {:.2}%", st.miss_rate())?;
        writeln!(out, "Cache Evictions: {}", st.evictions)?;
        writeln!(out, "Writebacks: {}", st.writebacks)?;
        writeln!(out, "Bus Invalidations: {}", st.invalidations)?;
        writeln!(out, "Data Traffic (Bytes): {}", st.traffic)?;
        writeln!(out)?;
        total_tx += st.invalidations;
        total_traffic += st.traffic;
    }

    writeln!(out, "Overall Bus Summary:")?;
    writeln!(out, "Total Bus Transactions: {total_tx}")?;
    writeln!(out, "Total Bus Traffic (Bytes): {total_traffic}")?;
    Ok(())
}

pub fn render_report(prefix: &str, spec: &SystemSpec, stats: &[CoreStats]) -> String {
    let mut buf = Vec::new();
    write_report(&mut buf, prefix, spec, stats).expect("writing to a Vec cannot fail");
    String::from_utf8(buf).expect("report is ASCII")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commons::NUM_CORES;

    #[test]
    fn configuration_echo() {
        let spec = SystemSpec::new(6, 2, 5).unwrap();
        let stats = vec![CoreStats::default(); NUM_CORES];
        let report = render_report("app1", &spec, &stats);
        assert!(report.starts_with("Simulation Parameters:\nTrace Prefix: app1\n"));
        assert!(report.contains("Block Size (Bytes): 32\n"));
        assert!(report.contains("Number of Sets: 64\n"));
        assert!(report.contains("Cache Size (KB per core): 4\n"));
        assert!(report.contains("Replacement Policy: LRU\n"));
    }

    #[test]
    fn miss_rate_has_two_decimals() {
        let mut stats = vec![CoreStats::default(); NUM_CORES];
        stats[0].instr = 3;
        stats[0].misses = 1;
        let spec = SystemSpec::new(1, 2, 2).unwrap();
        let report = render_report("t", &spec, &stats);
        assert!(report.contains("Cache Miss Rate: 33.33%\n"));
        // idle cores report a printable zero rate
        assert!(report.contains("Cache Miss Rate: 0.00%\n"));
    }

    #[test]
    fn bus_summary_totals() {
        let mut stats = vec![CoreStats::default(); NUM_CORES];
        stats[0].invalidations = 2;
        stats[0].traffic = 64;
        stats[3].invalidations = 1;
        stats[3].traffic = 32;
        let spec = SystemSpec::new(1, 2, 2).unwrap();
        let report = render_report("t", &spec, &stats);
        assert!(report.ends_with(
            "Overall Bus Summary:\nTotal Bus Transactions: 3\nTotal Bus Traffic (Bytes): 96\n"
        ));
    }
}
