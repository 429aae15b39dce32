// Copyright 2025 Accenture.
//
// SPDX-License-Identifier: Apache-2.0

//! Three ranks on UDP loopback: rank 0 broadcasts, the others answer.

use fablink::provider::udp::UdpProvider;
use fablink::{FabricContext, Link, Rank};
use log::info;
use postcard::experimental::max_size::MaxSize;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Serialize, Deserialize, MaxSize)]
struct Greeting {
    sender: u64,
    value: u32,
}

const CARDINALITY: u64 = 3;
const SERVICES: [&str; 3] = ["9710", "9711", "9712"];

fn build_link(ctx: &Arc<FabricContext>, rank: Rank) -> Link<Greeting> {
    let mut link = Link::new(Arc::clone(ctx), CARDINALITY, rank).expect("rank in range");
    link.configure_local_receiver("127.0.0.1", SERVICES[rank.id() as usize])
        .expect("local receiver");
    for peer in 0..CARDINALITY {
        if peer != rank.id() {
            link.configure_send_destination(Rank::new(peer), "127.0.0.1", SERVICES[peer as usize])
                .expect("destination");
        }
    }
    link
}

fn main() {
    env_logger::init();

    let ctx = FabricContext::initialize(Arc::new(UdpProvider::new()), "127.0.0.1")
        .expect("fabric context");

    let mut links: Vec<Link<Greeting>> = (0..CARDINALITY)
        .map(|rank| build_link(&ctx, Rank::new(rank)))
        .collect();

    links[0]
        .broadcast(&Greeting { sender: 0, value: 42 })
        .expect("broadcast");

    for rank in 1..CARDINALITY as usize {
        let greeting = links[rank].recv().expect("receive");
        info!("rank {rank} received {greeting:?}");
        links[rank]
            .send(
                &Greeting { sender: rank as u64, value: greeting.value + 1 },
                Rank::new(0),
            )
            .expect("reply");
    }

    for _ in 1..CARDINALITY {
        let reply = links[0].recv().expect("reply");
        info!("rank 0 received {reply:?}");
    }

    drop(links);
    FabricContext::finalize(ctx).expect("finalize");
}
