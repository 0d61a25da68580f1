use std::sync::Arc;

use super::encryption::LayerCipher;
use super::*;
use crate::constants::{
    SHORT_TUNNEL_BUILD_RECORD_SIZE, TUNNEL_BUILD_RECORD_SIZE,
};
use crate::data::{Hash, ProfileEvent, RouterIdentity, TunnelId};
use crate::i2np::frame as i2np_frame;
use crate::router::mock::{
    mock_router_identity, MockEndpointHandler, MockGarlicService, MockLocalHandler,
    MockNetworkDatabase, MockTransport,
};
use crate::router::{Config, Context};

/// A context wired entirely to recording mocks, with handles kept so tests
/// can assert on the traffic.
pub(crate) struct TestRouter {
    pub ctx: Arc<Context>,
    pub transport: Arc<MockTransport>,
    pub netdb: Arc<MockNetworkDatabase>,
    pub local: Arc<MockLocalHandler>,
    pub endpoint: Arc<MockEndpointHandler>,
    pub garlic: Arc<MockGarlicService>,
}

pub(crate) fn test_router() -> TestRouter {
    test_router_with_config(Config::default())
}

pub(crate) fn test_router_with_config(config: Config) -> TestRouter {
    let transport = Arc::new(MockTransport::new());
    let netdb = Arc::new(MockNetworkDatabase::new());
    let local = Arc::new(MockLocalHandler::new());
    let endpoint = Arc::new(MockEndpointHandler::new());
    let garlic = Arc::new(MockGarlicService::new());
    let ctx = Context::builder()
        .transport(transport.clone())
        .netdb(netdb.clone())
        .local(local.clone())
        .endpoint(endpoint.clone())
        .garlic(garlic.clone())
        .config(config)
        .build();
    TestRouter {
        ctx,
        transport,
        netdb,
        local,
        endpoint,
        garlic,
    }
}

pub(crate) fn identities(n: usize) -> Vec<RouterIdentity> {
    (0..n).map(|_| mock_router_identity()).collect()
}

/// Replays what the hops do to a build message in flight: each one replaces
/// its own record with a response carrying the given reply code, then
/// applies its reply transform to every slot.
pub(crate) fn simulate_hops(tunnel: &Tunnel, records: &mut [u8], ret_codes: &[u8]) {
    let config_guard = tunnel.config.lock().unwrap();
    let config = config_guard.as_ref().unwrap();
    let num_records = records[0] as usize;
    let body = &mut records[1..];
    for (i, hop) in config.hops().iter().enumerate() {
        hop.write_build_response(body, ret_codes[i]);
        for idx in 0..num_records {
            hop.encrypt_record(body, idx);
        }
    }
}

/// The layer ciphers of a pending tunnel's hops, in chain order. Captured
/// before the reply is processed, since establishment releases the config.
pub(crate) fn chain_layer_ciphers(tunnel: &Tunnel) -> Vec<LayerCipher> {
    let config_guard = tunnel.config.lock().unwrap();
    let config = config_guard.as_ref().unwrap();
    config
        .hops()
        .iter()
        .map(|hop| LayerCipher::new(&hop.iv_key, hop.layer_key.clone()))
        .collect()
}

fn build_outbound(
    router: &TestRouter,
    peers: Vec<RouterIdentity>,
    is_short: bool,
) -> (Arc<OutboundTunnel>, crate::i2np::BuildRecords) {
    let config = TunnelConfig::outbound(peers, TunnelId(1), Hash([1; 32]), is_short);
    let tunnel = Arc::new(OutboundTunnel::new(config, router.ctx.clone()));
    tunnel.build(0x4242, None);

    let mut sent = router.transport.take_sent();
    assert_eq!(sent.len(), 1);
    let (_, msg) = sent.remove(0);
    let records = match msg.payload {
        crate::i2np::MessagePayload::ShortTunnelBuild(records)
        | crate::i2np::MessagePayload::VariableTunnelBuild(records) => records,
        other => panic!("Unexpected build payload: {:?}", other),
    };
    (tunnel, records)
}

#[test]
fn build_message_has_standard_records_for_three_hops() {
    let router = test_router();
    let peers = identities(3);
    let first_hop = peers[0].hash.clone();

    let config = TunnelConfig::outbound(peers, TunnelId(1), Hash([1; 32]), false);
    let tunnel = Arc::new(OutboundTunnel::new(config, router.ctx.clone()));
    assert_eq!(tunnel.state(), TunnelState::Pending);
    tunnel.build(7, None);

    let mut sent = router.transport.take_sent();
    assert_eq!(sent.len(), 1);
    let (to, msg) = sent.remove(0);
    assert_eq!(to, first_hop);

    let records = match msg.payload {
        crate::i2np::MessagePayload::VariableTunnelBuild(records) => records,
        other => panic!("Unexpected build payload: {:?}", other),
    };
    assert_eq!(records.num_records(), 4);
    assert_eq!(records.0.len(), 1 + 4 * TUNNEL_BUILD_RECORD_SIZE);

    // Every real hop sits in a distinct slot.
    let config_guard = tunnel.base.config.lock().unwrap();
    let hops = config_guard.as_ref().unwrap().hops();
    let mut indices: Vec<usize> = hops.iter().map(|hop| hop.record_index).collect();
    indices.sort_unstable();
    indices.dedup();
    assert_eq!(indices.len(), 3);
    assert!(indices.iter().all(|idx| *idx < 4));
}

#[test]
fn five_hop_build_uses_max_records() {
    let router = test_router();
    let (_, records) = build_outbound(&router, identities(5), true);
    assert_eq!(records.num_records(), 8);
    assert_eq!(records.0.len(), 1 + 8 * SHORT_TUNNEL_BUILD_RECORD_SIZE);
}

#[test]
fn accepted_build_reply_establishes_tunnel() {
    let router = test_router();
    let peers = identities(3);
    let (tunnel, mut records) = build_outbound(&router, peers.clone(), false);

    simulate_hops(&tunnel.base, &mut records.0, &[0, 0, 0]);
    assert!(tunnel.base.handle_tunnel_build_response(&mut records.0));

    assert_eq!(tunnel.state(), TunnelState::Established);
    assert_eq!(tunnel.num_hops(), 3);
    assert!(tunnel.base.config.lock().unwrap().is_none());

    // Established hops are stored in reverse chain order.
    let inverted: Vec<Hash> = tunnel
        .base
        .inverted_peers()
        .into_iter()
        .map(|ri| ri.hash)
        .collect();
    let expected: Vec<Hash> = peers.iter().rev().map(|ri| ri.hash.clone()).collect();
    assert_eq!(inverted, expected);

    // peers() undoes the inversion.
    let direct: Vec<Hash> = tunnel.base.peers().into_iter().map(|ri| ri.hash).collect();
    let expected: Vec<Hash> = peers.into_iter().map(|ri| ri.hash).collect();
    assert_eq!(direct, expected);
}

#[test]
fn accepted_short_build_reply_establishes_five_hop_tunnel() {
    let router = test_router();
    let (tunnel, mut records) = build_outbound(&router, identities(5), true);

    simulate_hops(&tunnel.base, &mut records.0, &[0; 5]);
    assert!(tunnel.base.handle_tunnel_build_response(&mut records.0));
    assert_eq!(tunnel.state(), TunnelState::Established);
    assert_eq!(tunnel.num_hops(), 5);
}

#[test]
fn declined_build_reply_fails_tunnel_and_profiles_each_hop() {
    let router = test_router();
    let peers = identities(3);
    let (tunnel, mut records) = build_outbound(&router, peers.clone(), false);

    simulate_hops(&tunnel.base, &mut records.0, &[0, 30, 0]);
    assert!(!tunnel.base.handle_tunnel_build_response(&mut records.0));

    assert_eq!(tunnel.state(), TunnelState::BuildFailed);
    assert_eq!(tunnel.base.inverted_peers().len(), 0);

    // Every hop's reply code reaches its router profile.
    let events = router.netdb.profile_events();
    assert_eq!(events.len(), 3);
    for (i, peer) in peers.iter().enumerate() {
        let expected = if i == 1 { 30 } else { 0 };
        assert!(events
            .iter()
            .any(|(hash, ev)| *hash == peer.hash && *ev == ProfileEvent::BuildResponse(expected)));
    }
}

#[test]
fn build_reply_with_too_many_records_is_rejected() {
    let router = test_router();
    let (tunnel, mut records) = build_outbound(&router, identities(2), false);
    records.0[0] = 9;
    assert!(!tunnel.base.handle_tunnel_build_response(&mut records.0));
    assert_eq!(tunnel.state(), TunnelState::BuildFailed);
}

#[test]
fn truncated_build_reply_is_rejected() {
    let router = test_router();
    let (tunnel, records) = build_outbound(&router, identities(2), false);
    let mut truncated = records.0[..TUNNEL_BUILD_RECORD_SIZE].to_vec();
    assert!(!tunnel.base.handle_tunnel_build_response(&mut truncated));
    assert_eq!(tunnel.state(), TunnelState::BuildFailed);
}

#[test]
fn dropped_build_message_fails_tunnel() {
    let router = test_router();
    router.transport.drop_all();

    let config = TunnelConfig::outbound(identities(2), TunnelId(1), Hash([1; 32]), false);
    let tunnel = Arc::new(OutboundTunnel::new(config, router.ctx.clone()));
    tunnel.build(7, None);

    assert_eq!(tunnel.state(), TunnelState::BuildFailed);
}

#[test]
fn direct_short_inbound_build_registers_reply_key() {
    let router = test_router();
    let config = TunnelConfig::inbound(identities(2), &router.ctx.our_ident.hash, true);
    let tunnel = Arc::new(InboundTunnel::new(config, router.ctx.clone()));
    tunnel.build(7, None);

    // The reply comes back through the tunnel itself, which terminates at a
    // different router than the last hop: a one-time key must be registered.
    assert_eq!(router.garlic.submitted_count(), 1);
    assert_eq!(router.transport.sent_count(), 1);
}

#[test]
fn inbound_tunnel_decrypts_layers_and_notifies_endpoint() {
    let router = test_router();
    let config = TunnelConfig::inbound(identities(2), &router.ctx.our_ident.hash, true);
    let tunnel = Arc::new(InboundTunnel::new(config, router.ctx.clone()));
    tunnel.build(8, None);

    let mut sent = router.transport.take_sent();
    assert_eq!(sent.len(), 1);
    let (_, msg) = sent.remove(0);
    let mut records = match msg.payload {
        crate::i2np::MessagePayload::ShortTunnelBuild(records) => records,
        other => panic!("Unexpected build payload: {:?}", other),
    };

    let ciphers = chain_layer_ciphers(&tunnel.base);
    simulate_hops(&tunnel.base, &mut records.0, &[0, 0]);
    assert!(tunnel.base.handle_tunnel_build_response(&mut records.0));

    // A message travelling the tunnel gains one layer per hop, gateway first.
    let mut data = [0u8; 1024];
    for (i, b) in data.iter_mut().enumerate() {
        *b = (i % 251) as u8;
    }
    let plaintext = data;
    for cipher in &ciphers {
        cipher.encrypt_layer(&mut data);
    }

    // Drop back to pending to exercise the proof-of-life transition.
    tunnel.base.set_state(TunnelState::Pending);
    tunnel.handle_tunnel_data_msg(crate::i2np::TunnelData::from(
        tunnel.base.tunnel_id(),
        &data,
    ));

    assert_eq!(tunnel.state(), TunnelState::Established);
    let mut received = router.endpoint.take_received();
    assert_eq!(received.len(), 1);
    let (from, msg) = received.remove(0);
    assert_eq!(from, tunnel.base.tunnel_id());
    assert_eq!(&msg.data[..], &plaintext[..]);
}

#[test]
fn outbound_tunnel_emission_peels_to_plaintext_at_endpoint() {
    let router = test_router();
    let peers = identities(3);
    let (tunnel, mut records) = build_outbound(&router, peers, false);
    let ciphers = chain_layer_ciphers(&tunnel.base);
    simulate_hops(&tunnel.base, &mut records.0, &[0, 0, 0]);
    assert!(tunnel.base.handle_tunnel_build_response(&mut records.0));

    let payload = Message::from_payload(crate::i2np::MessagePayload::Data(vec![0x5a; 64]));
    let expected = crate::util::serialize(i2np_frame::gen_message(&payload));
    tunnel.send_tunnel_data_msg_to(None, None, payload);

    let mut sent = router.transport.take_sent();
    assert_eq!(sent.len(), 1);
    let (to, msg) = sent.remove(0);
    assert_eq!(to, *tunnel.base.next_ident());
    let mut td = match msg.payload {
        crate::i2np::MessagePayload::TunnelData(td) => td,
        other => panic!("Unexpected payload: {:?}", other),
    };

    // Each hop encrypts in flight; after the last layer the endpoint reads
    // the gateway plaintext.
    for cipher in &ciphers {
        cipher.encrypt_layer(&mut td.data);
    }
    let (_, tm) = super::frame::tunnel_message(&td.data).unwrap();
    assert_eq!(tm.0.len(), 1);
    assert_eq!(tm.0[0].1, &expected[..]);
}

#[test]
fn zero_hops_outbound_dispatches_by_delivery_type() {
    let router = test_router();
    let tunnel = Arc::new(OutboundTunnel::zero_hops(router.ctx.clone()));
    tunnel.base.set_state(TunnelState::Established);

    let gw_hash = Hash([4; 32]);
    let router_hash = Hash([5; 32]);
    let nested = Message::dummy_data();
    let nested_bytes = crate::util::serialize(i2np_frame::gen_message(&nested));

    tunnel.send_tunnel_data_msgs(vec![
        TunnelMessageBlock {
            delivery_type: TunnelMessageDeliveryType::Local,
            msg: Message::dummy_data(),
        },
        TunnelMessageBlock {
            delivery_type: TunnelMessageDeliveryType::Tunnel(TunnelId(33), gw_hash.clone()),
            msg: nested,
        },
        TunnelMessageBlock {
            delivery_type: TunnelMessageDeliveryType::Router(router_hash.clone()),
            msg: Message::dummy_data(),
        },
    ]);

    assert_eq!(router.local.handled_count(), 1);
    let sent = router.transport.take_sent();
    assert_eq!(sent.len(), 2);

    let (to, msg) = &sent[0];
    assert_eq!(*to, gw_hash);
    match &msg.payload {
        crate::i2np::MessagePayload::TunnelGateway(tg) => {
            assert_eq!(tg.tid, TunnelId(33));
            assert_eq!(tg.data, nested_bytes);
        }
        other => panic!("Unexpected payload: {:?}", other),
    }

    let (to, msg) = &sent[1];
    assert_eq!(*to, router_hash);
    assert!(matches!(
        msg.payload,
        crate::i2np::MessagePayload::Data(_)
    ));

    assert!(tunnel.num_sent_bytes() > 0);
}

#[test]
fn zero_hops_inbound_counts_bytes_and_hands_to_local_dispatcher() {
    let router = test_router();
    let tunnel = Arc::new(InboundTunnel::zero_hops(router.ctx.clone()));
    tunnel.base.set_state(TunnelState::Established);

    let msg = Message::dummy_data();
    let expected_len = msg.byte_len() as u64;
    tunnel.send_tunnel_data_msg(msg);

    assert_eq!(tunnel.num_received_bytes(), expected_len);
    let handled = router.local.take_handled();
    assert_eq!(handled.len(), 1);
    assert!(matches!(
        handled[0].payload,
        crate::i2np::MessagePayload::Data(_)
    ));
}

#[test]
fn real_inbound_tunnel_rejects_gateway_sends() {
    let router = test_router();
    let config = TunnelConfig::inbound(identities(1), &router.ctx.our_ident.hash, true);
    let tunnel = Arc::new(InboundTunnel::new(config, router.ctx.clone()));

    tunnel.send_tunnel_data_msg(Message::dummy_data());
    assert_eq!(tunnel.num_received_bytes(), 0);
    assert_eq!(router.local.handled_count(), 0);
}

#[test]
fn recreate_latches() {
    let router = test_router();
    let config = TunnelConfig::inbound(identities(1), &router.ctx.our_ident.hash, true);
    let tunnel = Arc::new(InboundTunnel::new(config, router.ctx.clone()));

    // No pool: recreation is impossible and nothing latches.
    assert!(!tunnel.recreate());
    assert!(!tunnel.base.is_recreated());
}

#[test]
fn latency_estimate_averages_samples() {
    let router = test_router();
    let config = TunnelConfig::outbound(identities(1), TunnelId(1), Hash([1; 32]), false);
    let tunnel = Arc::new(OutboundTunnel::new(config, router.ctx.clone()));

    assert_eq!(tunnel.base.mean_latency(), None);
    assert!(!tunnel.base.latency_fits_range(0, 1000));

    tunnel.base.add_latency_sample(100);
    tunnel.base.add_latency_sample(200);
    assert_eq!(tunnel.base.mean_latency(), Some(150));
    assert!(tunnel.base.latency_fits_range(100, 200));
    assert!(!tunnel.base.latency_fits_range(0, 100));
}
