//! Host-level tests for the access point's DHCP server.

use chat_portal::dhcp_server::{
    DHCP_REPLY_LEN, DhcpRequest, LeasePool, MessageType, answer, build_reply, parse_request,
};

const SERVER: [u8; 4] = [192, 168, 4, 1];
const MAC_A: [u8; 6] = [0x02, 0, 0, 0, 0, 0xA];
const MAC_B: [u8; 6] = [0x02, 0, 0, 0, 0, 0xB];
const MAC_C: [u8; 6] = [0x02, 0, 0, 0, 0, 0xC];

fn client_message(kind: u8, mac: [u8; 6], options: &[(u8, &[u8])]) -> Vec<u8> {
    let mut frame = vec![0u8; 240];
    frame[0] = 1; // BOOTREQUEST
    frame[1] = 1;
    frame[2] = 6;
    frame[4..8].copy_from_slice(&0x1234_5678u32.to_be_bytes());
    frame[10] = 0x80; // broadcast flag
    frame[28..34].copy_from_slice(&mac);
    frame[236..240].copy_from_slice(&[99, 130, 83, 99]);
    frame.extend_from_slice(&[53, 1, kind]);
    for (code, data) in options {
        frame.push(*code);
        frame.push(u8::try_from(data.len()).unwrap());
        frame.extend_from_slice(data);
    }
    frame.push(255);
    frame
}

fn parse(frame: &[u8]) -> DhcpRequest {
    parse_request(frame).unwrap()
}

/// Option payloads of a reply, keyed by code.
fn reply_options(reply: &[u8]) -> Vec<(u8, Vec<u8>)> {
    let mut options = Vec::new();
    let mut rest = &reply[240..];
    while let [code, tail @ ..] = rest {
        match *code {
            0 => rest = tail,
            255 => break,
            code => {
                let len = usize::from(tail[0]);
                options.push((code, tail[1..=len].to_vec()));
                rest = &tail[1 + len..];
            }
        }
    }
    options
}

#[test]
fn parses_a_discover() {
    let request = parse(&client_message(1, MAC_A, &[(50, &[192, 168, 4, 7])]));
    assert_eq!(request.kind, MessageType::Discover);
    assert_eq!(request.transaction_id, 0x1234_5678);
    assert_eq!(request.flags, 0x8000);
    assert_eq!(request.client_mac, MAC_A);
    assert_eq!(request.client_ip, None);
    assert_eq!(request.requested_ip, Some([192, 168, 4, 7]));
    assert_eq!(request.server_id, None);
}

#[test]
fn rejects_what_is_not_a_client_request() {
    assert_eq!(parse_request(&[0u8; 100]), None);

    let mut reply = client_message(1, MAC_A, &[]);
    reply[0] = 2;
    assert_eq!(parse_request(&reply), None);

    let mut no_cookie = client_message(1, MAC_A, &[]);
    no_cookie[236] = 0;
    assert_eq!(parse_request(&no_cookie), None);

    let mut no_type = client_message(1, MAC_A, &[]);
    no_type.truncate(240);
    no_type.push(255);
    assert_eq!(parse_request(&no_type), None);
}

#[test]
fn discover_then_request_is_acknowledged() {
    let mut pool = LeasePool::<16>::new(SERVER, 1);

    let discover = parse(&client_message(1, MAC_A, &[]));
    let (kind, offered) = answer(&discover, SERVER, &mut pool).unwrap();
    assert_eq!(kind, MessageType::Offer);
    assert_eq!(offered, [192, 168, 4, 2]);

    let request = parse(&client_message(3, MAC_A, &[(50, &offered), (54, &SERVER)]));
    assert_eq!(
        answer(&request, SERVER, &mut pool),
        Some((MessageType::Ack, offered))
    );
}

#[test]
fn request_for_another_server_is_ignored() {
    let mut pool = LeasePool::<16>::new(SERVER, 1);
    let request = parse(&client_message(
        3,
        MAC_A,
        &[(50, &[192, 168, 4, 2]), (54, &[10, 0, 0, 1])],
    ));
    assert_eq!(answer(&request, SERVER, &mut pool), None);
}

#[test]
fn request_for_someone_elses_address_is_refused() {
    let mut pool = LeasePool::<16>::new(SERVER, 1);
    assert_eq!(pool.assign(MAC_A, None), Some([192, 168, 4, 2]));

    let request = parse(&client_message(3, MAC_B, &[(50, &[192, 168, 4, 2])]));
    let (kind, _) = answer(&request, SERVER, &mut pool).unwrap();
    assert_eq!(kind, MessageType::Nak);
}

#[test]
fn leases_are_sticky_per_mac() {
    let mut pool = LeasePool::<16>::new(SERVER, 1);
    let a = pool.assign(MAC_A, None).unwrap();
    let b = pool.assign(MAC_B, None).unwrap();
    assert_ne!(a, b);
    assert_eq!(pool.assign(MAC_A, Some([192, 168, 4, 9])), Some(a));
    assert_eq!(pool.lease_of(MAC_B), Some(b));
}

#[test]
fn requested_address_is_honoured_when_free() {
    let mut pool = LeasePool::<16>::new(SERVER, 1);
    assert_eq!(pool.assign(MAC_A, Some([192, 168, 4, 9])), Some([192, 168, 4, 9]));
    // Outside the pool: falls back to the first free address.
    assert_eq!(pool.assign(MAC_B, Some([10, 0, 0, 5])), Some([192, 168, 4, 2]));
}

#[test]
fn release_frees_the_address() {
    let mut pool = LeasePool::<16>::new(SERVER, 1);
    pool.assign(MAC_A, None);
    let release = parse(&client_message(7, MAC_A, &[]));
    assert_eq!(answer(&release, SERVER, &mut pool), None);
    assert!(pool.is_empty());
    assert_eq!(pool.lease_of(MAC_A), None);
}

#[test]
fn full_pool_recycles_the_least_recent_lease() {
    let mut pool = LeasePool::<2>::new(SERVER, 1);
    let a = pool.assign(MAC_A, None).unwrap();
    let b = pool.assign(MAC_B, None).unwrap();
    pool.assign(MAC_A, None); // A renews

    assert_eq!(pool.assign(MAC_C, None), Some(b));
    assert_eq!(pool.lease_of(MAC_B), None);
    assert_eq!(pool.lease_of(MAC_A), Some(a));
    assert_eq!(pool.len(), 2);
}

#[test]
fn pool_near_the_top_of_the_subnet_stops_below_broadcast() {
    let mut pool = LeasePool::<16>::new([192, 168, 4, 250], 1);
    let hosts: Vec<u8> = [MAC_A, MAC_B, MAC_C, [0x02, 0, 0, 0, 0, 0xD], [0x02, 0, 0, 0, 0, 0xE]]
        .iter()
        .map(|&mac| pool.assign(mac, None).unwrap()[3])
        .collect();

    assert_eq!(hosts, vec![251, 252, 253, 254, 251]);
    assert_eq!(pool.len(), 4);
    // MAC_A lost its lease to the fifth client; asking for the broadcast address recycles
    // the next oldest lease instead.
    assert_eq!(pool.assign(MAC_A, Some([192, 168, 4, 255])), Some([192, 168, 4, 252]));
}

#[test]
fn pool_starting_past_the_subnet_hands_out_nothing() {
    let mut pool = LeasePool::<4>::new([192, 168, 4, 254], 1);
    assert_eq!(pool.assign(MAC_A, None), None);
    assert!(pool.is_empty());
}

#[test]
fn offer_carries_the_portal_as_router_and_dns() {
    let request = parse(&client_message(1, MAC_A, &[]));
    let mut out = [0u8; 768];
    let len = build_reply(
        &mut out,
        &request,
        MessageType::Offer,
        [192, 168, 4, 2],
        SERVER,
        3600,
    )
    .unwrap();
    assert_eq!(len, DHCP_REPLY_LEN);

    let reply = &out[..len];
    assert_eq!(reply[0], 2);
    assert_eq!(&reply[4..8], &0x1234_5678u32.to_be_bytes());
    assert_eq!(&reply[16..20], &[192, 168, 4, 2]);
    assert_eq!(&reply[28..34], &MAC_A);

    let options = reply_options(reply);
    assert!(options.contains(&(53, vec![2])));
    assert!(options.contains(&(54, SERVER.to_vec())));
    assert!(options.contains(&(51, 3600u32.to_be_bytes().to_vec())));
    assert!(options.contains(&(1, vec![255, 255, 255, 0])));
    assert!(options.contains(&(3, SERVER.to_vec())));
    assert!(options.contains(&(6, SERVER.to_vec())));
}

#[test]
fn nak_has_no_lease_options() {
    let request = parse(&client_message(3, MAC_A, &[]));
    let mut out = [0u8; 300];
    let len = build_reply(&mut out, &request, MessageType::Nak, [0; 4], SERVER, 3600).unwrap();
    let options = reply_options(&out[..len]);
    assert_eq!(options, vec![(53, vec![6]), (54, SERVER.to_vec())]);
}
