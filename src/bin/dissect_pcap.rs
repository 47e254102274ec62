use anyhow::Context;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use tlvmatch::capture::{self, ConversationTable};
use tlvmatch::config::{Config, ConfigError, USAGE};
use tlvmatch::protocols::{radius, ras, zabbix};
use tlvmatch::{dump, find_field, Dissection, MessageMeta, Registry, Role, Session};

#[derive(Debug, Default)]
struct ProtocolStats {
    messages: u64,
    malformed: u64,
    requests: u64,
    responses: u64,
    unmatched_responses: u64,
    duplicates: u64,
}

fn main() -> anyhow::Result<()> {
    let config = match Config::from_args(std::env::args().skip(1)) {
        Ok(c) => c,
        Err(ConfigError::Help) => {
            println!("{}", USAGE);
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };
    let default_level = if config.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level)).init();

    let mut registry = Registry::with_defaults();
    config.apply_ports(&mut registry)?;
    let mut session = Session::new(registry, config.limits);
    let mut conversations = ConversationTable::new();

    let mut dump_writer: Option<Box<dyn Write>> = match &config.dump {
        Some(p) if p.as_os_str() == "-" => Some(Box::new(io::stdout())),
        Some(p) => {
            let f = File::create(p).with_context(|| format!("create dump file {}", p.display()))?;
            Some(Box::new(BufWriter::new(f)))
        }
        None => None,
    };
    let mut write_error: Option<io::Error> = None;

    let mut transport_payloads: u64 = 0;
    let mut unrouted: u64 = 0;
    let mut stats: BTreeMap<&'static str, ProtocolStats> = BTreeMap::new();

    let packets = capture::read_file(&config.capture, |pkt| {
        let Some(tp) = capture::transport_payload(pkt.linktype, pkt.data) else {
            return;
        };
        if tp.payload.is_empty() {
            return;
        }
        transport_payloads += 1;
        let meta = MessageMeta {
            frame: pkt.frame,
            time: pkt.time,
            conversation: conversations.id_for(tp.transport, tp.source, tp.destination),
            source: tp.source,
            destination: tp.destination,
        };
        let Some(d) = session.dissect_by_port(&meta, tp.payload) else {
            unrouted += 1;
            return;
        };

        let s = stats.entry(d.protocol).or_default();
        s.messages += 1;
        if d.is_malformed() {
            s.malformed += 1;
        }
        match d.transaction {
            Some(t) if t.role == Role::Request => s.requests += 1,
            Some(_) => s.responses += 1,
            None if is_unmatched_response(&d) => s.unmatched_responses += 1,
            None => {}
        }
        if d.is_duplicate() {
            s.duplicates += 1;
        }

        if config.dumps_frame(pkt.frame) && write_error.is_none() {
            if let Some(w) = dump_writer.as_mut() {
                let result = dump::write_dissection(&mut **w, &meta, &d).and_then(|_| {
                    if config.verbose {
                        dump::write_hex_with_offset(&mut **w, tp.payload)?;
                    }
                    Ok(())
                });
                if let Err(e) = result {
                    write_error = Some(e);
                }
            }
        }
    })
    .with_context(|| format!("read {}", config.capture.display()))?;

    if let Some(e) = write_error {
        return Err(e).context("write dump");
    }
    if let Some(w) = dump_writer.as_mut() {
        w.flush().context("flush dump")?;
    }

    eprintln!("capture: {}", config.capture.display());
    eprintln!("packets: {}", packets);
    eprintln!("transport payloads: {}", transport_payloads);
    eprintln!("conversations: {}", conversations.len());
    eprintln!("not routed to a protocol: {}", unrouted);
    eprintln!("pending calls: {}", session.flows().len());
    for (name, s) in &stats {
        eprintln!(
            "  {}: messages={}, malformed={}, requests={}, responses={}, unmatched responses={}, duplicates={}",
            name, s.messages, s.malformed, s.requests, s.responses, s.unmatched_responses, s.duplicates
        );
    }
    Ok(())
}

/// A reply of a matched message kind that came without a cross-reference.
fn is_unmatched_response(d: &Dissection) -> bool {
    match d.protocol {
        radius::NAME => find_field(&d.fields, radius::TAG_CODE)
            .and_then(|f| f.value.as_u64())
            .and_then(|code| radius::message_type(code as u8))
            .map_or(false, |mt| !mt.role.is_request()),
        ras::NAME => find_field(&d.fields, ras::TAG_MESSAGE)
            .and_then(|f| f.value.as_u64())
            .map_or(false, |tag| tag < ras::MATCHED_TAGS as u64 && tag % 3 != 0),
        zabbix::NAME => true,
        _ => false,
    }
}
