use crate::input::RollupConfig;
use rollup_core::competition::Level;
use rollup_core::confidence::Assigned;
use std::path::{Path, PathBuf};

const HEADERS: [&str; 12] = [
    "psm_id",
    "filename",
    "scannr",
    "expmass",
    "calcmass",
    "charge",
    "peptide",
    "proteins",
    "score",
    "q_value",
    "posterior_error",
    "label",
];

pub fn serialize_record(record: &Assigned, filenames: &[String]) -> csv::ByteRecord {
    let row = &record.row;
    let mut out = csv::ByteRecord::new();
    out.push_field(row.psm_id.as_bytes());
    match &row.specfile {
        Some(specfile) => out.push_field(specfile.as_bytes()),
        None => out.push_field(filenames[row.file_id].as_bytes()),
    }
    match row.scannr {
        Some(scannr) => out.push_field(itoa::Buffer::new().format(scannr).as_bytes()),
        None => out.push_field(b""),
    }
    match row.expmass {
        Some(expmass) => out.push_field(ryu::Buffer::new().format(expmass).as_bytes()),
        None => out.push_field(b""),
    }
    match row.calcmass {
        Some(calcmass) => out.push_field(ryu::Buffer::new().format(calcmass).as_bytes()),
        None => out.push_field(b""),
    }
    match row.charge {
        Some(charge) => out.push_field(itoa::Buffer::new().format(charge).as_bytes()),
        None => out.push_field(b""),
    }
    out.push_field(row.peptide.as_bytes());
    out.push_field(row.proteins.as_bytes());
    out.push_field(ryu::Buffer::new().format(row.score).as_bytes());
    out.push_field(ryu::Buffer::new().format(record.q_value).as_bytes());
    out.push_field(ryu::Buffer::new().format(record.posterior_error).as_bytes());
    out.push_field(itoa::Buffer::new().format(row.label).as_bytes());
    out
}

/// Write the target and decoy tables for one level. Returns the two paths.
pub fn write_level(
    config: &RollupConfig,
    level: Level,
    filenames: &[String],
    assigned: &[Assigned],
) -> anyhow::Result<(PathBuf, PathBuf)> {
    let targets_path = config.dest_dir.join(format!(
        "{}.targets.{}.csv",
        config.file_root,
        level.plural()
    ));
    let decoys_path = config.dest_dir.join(format!(
        "{}.decoys.{}.csv",
        config.file_root,
        level.plural()
    ));

    write_table(
        &targets_path,
        assigned.iter().filter(|r| r.is_target()),
        filenames,
    )?;
    write_table(
        &decoys_path,
        assigned.iter().filter(|r| !r.is_target()),
        filenames,
    )?;
    Ok((targets_path, decoys_path))
}

fn write_table<'a>(
    path: &Path,
    records: impl Iterator<Item = &'a Assigned>,
    filenames: &[String],
) -> anyhow::Result<()> {
    let mut wtr = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .from_writer(vec![]);
    wtr.write_byte_record(&csv::ByteRecord::from(HEADERS.to_vec()))?;
    for record in records {
        wtr.write_byte_record(&serialize_record(record, filenames))?;
    }
    wtr.flush()?;
    let bytes = wtr.into_inner()?;

    // Stage through a scratch path so that an interrupted run cannot leave a
    // half-written table that looks complete
    let staged = path.with_extension("csv.tmp");
    std::fs::write(&staged, bytes)?;
    std::fs::rename(&staged, path)?;
    Ok(())
}
