//! Run command implementation

use anyhow::{Context, Result};
use crossheap::buffer::process_owned;
use crossheap::demo::buffers::BufferFactory;
use crossheap::demo::imaging::{ProcessorKind, create_processor};
use crossheap::demo::records::{make_record, make_shared_record};
use crossheap::demo::text::Uppercase;
use crossheap::{HandleTable, Host, HostConfig, RegistryStats, Status};
use serde::Serialize;

use super::Scenario;

#[derive(Serialize)]
struct ScenarioReport {
    scenario: &'static str,
    verified: bool,
    /// Status of each protocol step, in order.
    steps: Vec<StepInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stats: Option<RegistryStats>,
    clean: bool,
}

#[derive(Serialize)]
struct StepInfo {
    step: &'static str,
    status: Status,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl StepInfo {
    fn record<T>(step: &'static str, result: &crossheap::Result<T>) -> StepInfo {
        StepInfo {
            step,
            status: Status::from_result(result),
            error: result.as_ref().err().map(ToString::to_string),
        }
    }
}

pub fn run(config: HostConfig, scenarios: Vec<Scenario>, steps: usize) -> Result<()> {
    let scenarios = if scenarios.is_empty() {
        Scenario::DEFAULT.to_vec()
    } else {
        scenarios
    };

    let mut reports = Vec::with_capacity(scenarios.len());
    for scenario in scenarios {
        let host = Host::new(config.clone())
            .with_context(|| format!("Failed to create host for {}", scenario.name()))?;
        log::info!("running scenario '{}'", scenario.name());
        let steps = match scenario {
            Scenario::Opaque => opaque(&host)?,
            Scenario::Interface => interface(&host)?,
            Scenario::Bound => bound(&host)?,
            Scenario::Shared => shared(&host)?,
            Scenario::Buffer => buffer(),
            Scenario::Churn => churn(&host, steps)?,
            Scenario::Misuse => misuse(&host)?,
        };
        reports.push(ScenarioReport {
            scenario: scenario.name(),
            verified: host.registry().is_some(),
            steps,
            stats: host.stats(),
            clean: host.verify_clean().is_ok(),
        });
    }

    println!("{}", serde_json::to_string_pretty(&reports)?);

    let unclean: Vec<_> = reports
        .iter()
        .filter(|r| !r.clean && r.scenario != Scenario::Misuse.name())
        .map(|r| r.scenario)
        .collect();
    if !unclean.is_empty() {
        anyhow::bail!("Unclean scenarios: {}", unclean.join(", "));
    }
    Ok(())
}

fn opaque(host: &Host) -> Result<Vec<StepInfo>> {
    let module = host.load_module("buffers")?;
    let factory = BufferFactory::new(&module);
    let handle = factory.create(64)?;
    let mut steps = vec![StepInfo::record("write_at", &factory.write_at(handle, 0, b"opaque"))];
    let mut out = [0u8; 6];
    steps.push(StepInfo::record("read_at", &factory.read_at(handle, 0, &mut out)));
    steps.push(StepInfo::record("destroy", &factory.destroy(handle)));
    Ok(steps)
}

fn interface(host: &Host) -> Result<Vec<StepInfo>> {
    let module = host.load_module("imaging")?;
    let mut steps = Vec::new();
    for kind in [ProcessorKind::Invert, ProcessorKind::Threshold(128)] {
        let mut processor = create_processor(&module, kind)?;
        let mut pixels: Vec<u8> = (0..=255).collect();
        processor.process(&mut pixels);
        log::debug!("{} processed {} pixels", processor.name(), processor.processed());
        steps.push(StepInfo::record("release", &processor.release()));
    }
    Ok(steps)
}

fn bound(host: &Host) -> Result<Vec<StepInfo>> {
    let producer = host.load_module("records")?;
    let mut record = make_record(&producer, 1)?;
    let mut moved = record.take();
    let steps = vec![
        StepInfo::record("get_after_take", &record.get().map(|_| ())),
        StepInfo::record("reset_empty", &record.reset()),
        StepInfo::record("reset", &moved.reset()),
    ];
    Ok(steps)
}

fn shared(host: &Host) -> Result<Vec<StepInfo>> {
    let producer = host.load_module("records")?;
    let record = make_shared_record(&producer, 2)?;
    let weak = record.downgrade();
    std::thread::scope(|s| {
        for _ in 0..4 {
            let clone = record.clone();
            s.spawn(move || log::debug!("worker holds '{}'", clone.label()));
        }
    });
    drop(record);
    let upgraded = weak
        .upgrade()
        .map(drop)
        .ok_or_else(|| crossheap::Error::dangling_use(None));
    Ok(vec![StepInfo::record("upgrade_after_drop", &upgraded)])
}

fn buffer() -> Vec<StepInfo> {
    let input = b"hello world".as_slice();
    vec![
        StepInfo::record("process_owned", &process_owned(&Uppercase, input)),
        StepInfo::record("process_short", &super::uppercase::process_into(input, 11)),
    ]
}

fn churn(host: &Host, steps: usize) -> Result<Vec<StepInfo>> {
    let module = host.load_module("churn")?;
    let table = HandleTable::new(&module, "value");
    let mut held = Vec::new();
    for step in 0..steps {
        if step % 3 == 2 {
            if let Some(handle) = held.pop() {
                table.destroy(handle)?;
            }
        } else {
            held.push(table.create(step as u64)?);
        }
    }
    log::debug!("churn left {} resources before cleanup", held.len());
    let drained = held.into_iter().try_for_each(|handle| table.destroy(handle));
    Ok(vec![StepInfo::record("drain", &drained)])
}

fn misuse(host: &Host) -> Result<Vec<StepInfo>> {
    let a = host.load_module("a")?;
    let b = host.load_module("b")?;
    let in_a = BufferFactory::new(&a);
    let in_b = BufferFactory::new(&b);

    let handle = in_a.create(16)?;
    let mut steps = vec![StepInfo::record("destroy_in_other_module", &in_b.destroy(handle))];
    steps.push(StepInfo::record("destroy", &in_a.destroy(handle)));
    steps.push(StepInfo::record("destroy_again", &in_a.destroy(handle)));
    steps.push(StepInfo::record("use_after_destroy", &in_a.size(handle)));
    Ok(steps)
}
