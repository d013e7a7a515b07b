mod common;

use common::{init_logs, LossyLink};
use quilt_protocol::{
    Endpoint, EndpointConfig, EndpointEvent, EndpointMode, Value, ViewParams,
};

fn deliver(endpoint: &mut Endpoint, datagram: &[u8]) -> Vec<EndpointEvent> {
    endpoint
        .receive_datagram(datagram)
        .expect("well-formed datagram")
}

#[test]
fn server_stays_quiet_without_a_client_view() {
    let mut server = Endpoint::new(EndpointConfig::new(EndpointMode::Server, 2));
    server.world_mut().set(1, Value::Int(42));
    assert!(server.server_cycle().expect("cycle").is_none());
    assert!(server.server_cycle().expect("cycle").is_none());
}

#[test]
fn world_converges_over_a_lossy_link() {
    init_logs();
    let mut client = Endpoint::new(EndpointConfig::new(EndpointMode::Client, 1));
    let mut server = Endpoint::new(EndpointConfig::new(EndpointMode::Server, 2));
    let mut link_cs = LossyLink::new(41, 0.1, 0.1, 0.01);
    let mut link_sc = LossyLink::new(42, 0.1, 0.1, 0.01);

    let view = ViewParams::new([1.0, 2.0, 3.0], 0.5);
    client.set_view(view);

    let mut state_updates = 0;
    let mut view_updates = 0;
    for iteration in 0i64..150 {
        // the server keeps editing the world while the link misbehaves
        server.world_mut().set(iteration % 20, Value::Int(iteration));
        if iteration % 9 == 0 {
            server.world_mut().remove((iteration / 2) % 20);
        }

        let datagram = client.client_cycle().expect("client cycle");
        for arrival in link_cs.transmit(&datagram) {
            for event in deliver(&mut server, &arrival) {
                if event == EndpointEvent::ViewUpdated {
                    view_updates += 1;
                }
            }
        }
        if let Some(datagram) = server.server_cycle().expect("server cycle") {
            for arrival in link_sc.transmit(&datagram) {
                for event in deliver(&mut client, &arrival) {
                    if event == EndpointEvent::StateUpdated {
                        state_updates += 1;
                    }
                }
            }
        }
    }

    assert!(view_updates > 0);
    assert!(state_updates > 0);

    // quiesce over a clean link with no further edits
    let mut flush_cs = LossyLink::lossless(43);
    let mut flush_sc = LossyLink::lossless(44);
    for _ in 0..20 {
        let datagram = client.client_cycle().expect("client cycle");
        for arrival in flush_cs.transmit(&datagram) {
            deliver(&mut server, &arrival);
        }
        if let Some(datagram) = server.server_cycle().expect("server cycle") {
            for arrival in flush_sc.transmit(&datagram) {
                deliver(&mut client, &arrival);
            }
        }
    }

    assert_eq!(client.world(), server.world());
    assert!(!client.world().is_empty());
    assert_eq!(server.remote_view(), view);
}

#[test]
fn view_change_mid_session_reaches_the_server() {
    let mut client = Endpoint::new(EndpointConfig::new(EndpointMode::Client, 1));
    let mut server = Endpoint::new(EndpointConfig::new(EndpointMode::Server, 2));
    let mut link_cs = LossyLink::lossless(51);
    let mut link_sc = LossyLink::lossless(52);

    client.set_view(ViewParams::new([0.0, 0.0, 0.0], 1.0));
    server.world_mut().set(7, Value::str("payload"));

    let step = |client: &mut Endpoint,
                server: &mut Endpoint,
                link_cs: &mut LossyLink,
                link_sc: &mut LossyLink| {
        let datagram = client.client_cycle().expect("client cycle");
        for arrival in link_cs.transmit(&datagram) {
            deliver(server, &arrival);
        }
        if let Some(datagram) = server.server_cycle().expect("server cycle") {
            for arrival in link_sc.transmit(&datagram) {
                deliver(client, &arrival);
            }
        }
    };

    for _ in 0..5 {
        step(&mut client, &mut server, &mut link_cs, &mut link_sc);
    }
    assert_eq!(client.world(), server.world());

    let moved = ViewParams::new([10.0, -4.0, 0.5], 2.0);
    client.set_view(moved);
    for _ in 0..3 {
        step(&mut client, &mut server, &mut link_cs, &mut link_sc);
    }
    assert_eq!(server.remote_view(), moved);
}
