use crate::core::step_engine::StepOutputs;
use anyhow::anyhow;
use csv::WriterBuilder;
use formatx::formatx;
use serde::Serialize;
use std::borrow::Cow;
use std::fmt::Debug;
use std::fs::File;
use std::io;
use std::io::{BufWriter, Write};
use std::path::PathBuf;

pub trait Output: Debug {
    fn writer_for_location_key(&self, location_key: &str) -> anyhow::Result<impl Write>;
    /// Whether anything written to this output is discarded, so that writing can be skipped.
    fn is_noop(&self) -> bool {
        false
    }
}

/// Writes each location key to its own file in a directory, named by a `formatx` template
/// such as `"{}.csv"`.
#[derive(Debug)]
pub struct FileOutput {
    directory_path: PathBuf,
    file_template: String,
}

impl FileOutput {
    pub fn new(directory_path: PathBuf, file_template: String) -> Self {
        Self {
            directory_path,
            file_template,
        }
    }

    pub fn file_path(&self, location_key: &str) -> anyhow::Result<PathBuf> {
        let file_name = formatx!(&self.file_template, location_key)
            .map_err(|e| anyhow!("bad output file template '{}': {e:?}", self.file_template))?;
        Ok(self.directory_path.join(file_name))
    }
}

impl Output for FileOutput {
    fn writer_for_location_key(&self, location_key: &str) -> anyhow::Result<impl Write> {
        Ok(BufWriter::new(File::create(self.file_path(location_key)?)?))
    }
}

impl Output for &FileOutput {
    fn writer_for_location_key(&self, location_key: &str) -> anyhow::Result<impl Write> {
        <FileOutput as Output>::writer_for_location_key(self, location_key)
    }
}

/// An output that goes to nowhere/ a "sink"/ /dev/null.
#[derive(Debug, Default)]
pub struct SinkOutput;

impl Output for SinkOutput {
    fn writer_for_location_key(&self, _location_key: &str) -> anyhow::Result<impl Write> {
        Ok(io::sink())
    }

    fn is_noop(&self) -> bool {
        true
    }
}

/// Write a per-step trace as CSV, with a units row under the headings
pub fn write_trace(
    output: &impl Output,
    location_key: &str,
    source_names: &[&str],
    trace: &[StepOutputs],
) -> anyhow::Result<()> {
    if output.is_noop() {
        return Ok(());
    }
    let writer = output.writer_for_location_key(location_key)?;
    let mut writer = WriterBuilder::new().flexible(true).from_writer(writer);

    let node_count = trace.first().map_or(0, |step| step.node_temps.len());

    let mut headings: Vec<Cow<'static, str>> = vec![
        "Minute".into(),
        "Draw volume".into(),
        "Inlet temperature".into(),
        "Ambient temperature".into(),
        "Outlet temperature".into(),
        "Delivered energy".into(),
        "Standby losses".into(),
    ];
    let mut units_row = vec!["[min]", "[L]", "[degC]", "[degC]", "[degC]", "[kWh]", "[kWh]"];
    for name in source_names {
        headings.push(format!("{name} runtime").into());
        units_row.push("[min]");
        headings.push(format!("{name} energy input").into());
        units_row.push("[kWh]");
        headings.push(format!("{name} energy output").into());
        units_row.push("[kWh]");
    }
    for node in 1..=node_count {
        headings.push(format!("T{node}").into());
        units_row.push("[degC]");
    }
    writer.write_record(headings.iter().map(|heading| heading.as_ref()))?;
    writer.write_record(&units_row)?;

    for step in trace {
        let conditions = &step.conditions;
        let mut row = vec![
            step.elapsed_minutes.to_string(),
            conditions.draw_volume_litres.to_string(),
            conditions.inlet_temp.to_string(),
            conditions.ambient_temp.to_string(),
            step.outlet_temp.map_or_else(String::new, |temp| temp.to_string()),
            step.delivered_energy_kwh.to_string(),
            step.standby_losses_kwh.to_string(),
        ];
        for source in &step.sources {
            row.push(source.runtime_minutes.to_string());
            row.push(source.energy_input_kwh.to_string());
            row.push(source.energy_output_kwh.to_string());
        }
        row.extend(step.node_temps.iter().map(|temp| temp.to_string()));
        writer.write_record(&row)?;
    }
    writer.flush()?;

    Ok(())
}

/// Write a summary as pretty-printed JSON
pub fn write_summary(
    output: &impl Output,
    location_key: &str,
    summary: &impl Serialize,
) -> anyhow::Result<()> {
    if output.is_noop() {
        return Ok(());
    }
    let mut writer = output.writer_for_location_key(location_key)?;
    serde_json::to_writer_pretty(&mut writer, summary)?;
    writer.flush()?;
    Ok(())
}
