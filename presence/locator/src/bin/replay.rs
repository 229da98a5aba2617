// Copyright 2024 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;

use clap::Parser;
use log::{info, warn};

use locator::advertisement::Advertisement;
use locator::config::{ConfigLoader, FsConfigLoader};
use locator::coordinator::{Coordinator, CycleEvent, CycleReport, CYCLE_INTERVAL_SECS};
use locator::dump::DumpRequest;
use locator::error::LocatorError;

#[derive(Parser, Debug)]
#[command(about = "Replay a JSON-lines advertisement capture through the locator")]
struct Args {
    /// Locator configuration (JSON).
    #[arg(long)]
    config: PathBuf,

    /// One advertisement per line, stamped in seconds.
    #[arg(long)]
    capture: PathBuf,

    /// Print reports as JSON lines.
    #[arg(long)]
    json: bool,

    /// Print a diagnostic dump after the replay.
    #[arg(long)]
    dump: bool,

    /// Mask MAC addresses in the dump.
    #[arg(long)]
    redact: bool,
}

fn print_report(report: &CycleReport, now: f64, json: bool) {
    for device in &report.new_devices {
        if json {
            println!("{}", serde_json::json!({"new_device": device, "at": now}));
        } else {
            println!("{:>9.2} new {}", now, device.address);
        }
    }
    for device in &report.updated {
        if json {
            println!("{}", serde_json::json!({"update": device, "at": now}));
        } else {
            let area = device.area_name.as_deref().unwrap_or("-");
            let distance = device
                .area_distance
                .map_or_else(|| String::from("-"), |d| format!("{:.2} m", d));
            let position = device
                .position
                .map_or_else(|| String::from("-"), |p| format!("({:.2}, {:.2}, {:.2})", p.x, p.y, p.z));
            println!(
                "{:>9.2} {} area={} distance={} position={}",
                now, device.name, area, distance, position
            );
        }
    }
    for address in &report.pruned {
        if json {
            println!("{}", serde_json::json!({"pruned": address, "at": now}));
        } else {
            println!("{:>9.2} pruned {}", now, address);
        }
    }
}

fn read_capture(path: &PathBuf) -> Result<Vec<Advertisement>, LocatorError> {
    let file = File::open(path)
        .map_err(|err| LocatorError::AccessDenied(format!("{}: {}", path.display(), err)))?;
    let mut adverts = Vec::new();
    for (index, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|err| LocatorError::AccessDenied(err.to_string()))?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<Advertisement>(&line) {
            Ok(advert) => adverts.push(advert),
            Err(err) => warn!("Skipping line {}: {}", index + 1, err),
        }
    }
    adverts.sort_by(|a, b| a.stamp.total_cmp(&b.stamp));
    Ok(adverts)
}

fn main() -> Result<(), LocatorError> {
    env_logger::init();
    let args = Args::parse();

    let config = FsConfigLoader::new(&args.config).load()?;
    let adverts = read_capture(&args.capture)?;
    info!("Replaying {} advertisements.", adverts.len());

    let mut coordinator = Coordinator::new(&config);
    let mut next_tick = adverts.first().map_or(0.0, |advert| advert.stamp);
    let mut now = next_tick;
    for advert in adverts {
        while advert.stamp >= next_tick {
            now = next_tick;
            print_report(&coordinator.run_cycle(now), now, args.json);
            next_tick += CYCLE_INTERVAL_SECS;
        }
        now = advert.stamp;
        coordinator.enqueue(CycleEvent::Advertisement(advert));
        if coordinator.should_update_on_advert(now) {
            print_report(&coordinator.run_cycle(now), now, args.json);
        }
    }
    print_report(&coordinator.run_cycle(now), now, args.json);

    if args.dump {
        let request = DumpRequest {
            redact: args.redact,
            ..DumpRequest::default()
        };
        let dump = coordinator.dump_devices(&request, now);
        let text = serde_json::to_string_pretty(&dump)
            .map_err(|err| LocatorError::Internal(err.to_string()))?;
        println!("{}", text);
    }
    Ok(())
}
