//! Example of using the tb-client `Client` from plain threads.
//!
//! Creates a few accounts through manually pipelined packets, waits for the
//! completions and looks the accounts up again.
//!
//! # Running
//!
//! ```bash
//! cargo run --example submit_accounts -- 127.0.0.1 3000
//! ```

use tb_client::{Account, Client, ClientError, Config};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().collect();
    let host = args.get(1).map(|s| s.as_str()).unwrap_or("127.0.0.1");
    let port = args.get(2).and_then(|s| s.parse().ok()).unwrap_or(3000);

    println!("Connecting to {}:{}...", host, port);
    let client: Client<&'static str> = Client::init(host, port, 0, Config::default())?;
    println!("Client ID: {:032x}", client.id());
    println!(
        "Packets: {}, batch limit: {}",
        client.packet_capacity(),
        client.max_batch_count()
    );

    let batches: Vec<(&'static str, Vec<Account>)> = ["alpha", "beta", "gamma"]
        .into_iter()
        .enumerate()
        .map(|(i, name)| {
            let accounts = (0..3)
                .map(|j| Account {
                    id: tb_client::id(),
                    user_data: (i * 10 + j) as u64,
                    ledger: 1,
                    code: 100 + i as u32,
                    ..Default::default()
                })
                .collect();
            (name, accounts)
        })
        .collect();

    // Acquire and submit every batch before waiting on any of them.
    let mut completions = Vec::new();
    for (name, accounts) in &batches {
        let packet = match client.acquire_packet(accounts, *name) {
            Ok(packet) => packet,
            Err(ClientError::PoolExhausted) => {
                println!("Pool exhausted, skipping batch {}", name);
                continue;
            }
            Err(e) => return Err(e.into()),
        };
        println!("Submitting {} as packet {}", name, packet.id());
        completions.push(client.submit_packet(packet)?);
    }

    for completion in completions {
        let event = completion.wait()?;
        let created = event.results.iter().filter(|r| r.is_ok()).count();
        println!(
            "Batch {} (correlation {}): {}/{} created",
            event.context,
            event.correlation,
            created,
            event.results.len()
        );
        for result in event.results.iter().filter(|r| !r.is_ok()) {
            println!("  record {} failed: {:?}", result.index, result.result);
        }
    }

    let ids: Vec<u128> = batches.iter().flat_map(|(_, a)| a.iter().map(|a| a.id)).collect();
    let found = client.lookup_with_context(&ids, "lookup")?.wait()?;
    println!("Found {} of {} accounts", found.results.len(), ids.len());

    client.deinit();
    println!("Done!");
    Ok(())
}
