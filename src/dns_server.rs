//! Captive-portal DNS responder.
//!
//! Every query, whatever name it asks for, is answered with a single A record pointing at the
//! access point. Phones and laptops take that as "this network intercepts traffic" and open
//! their captive-portal browser.

#![allow(clippy::future_not_send, reason = "single-threaded")]

/// Length of the fixed DNS header.
pub const DNS_HEADER_LEN: usize = 12;

/// Flags for a standard response with no error (QR=1, RD=1, RA=1).
const RESPONSE_FLAGS: [u8; 2] = [0x81, 0x80];

const ANSWER_TTL_SECONDS: u32 = 60;

// Name pointer to offset 12, type A, class IN, TTL, RDLENGTH 4, address.
const ANSWER_LEN: usize = 16;

/// Build the spoofed response for `query` into `response`.
///
/// Copies the transaction ID and question count, echoes the question section, and appends one
/// A record for `answer_ip`. Returns the response length, or `None` when the query is shorter
/// than a DNS header or the response would not fit `response`.
#[must_use]
pub fn handle_query(query: &[u8], answer_ip: [u8; 4], response: &mut [u8]) -> Option<usize> {
    let (header, body) = query.split_at_checked(DNS_HEADER_LEN)?;
    let transaction_id = header.get(0..2)?;
    let question_count = header.get(4..6)?;

    let qdcount = u16::from_be_bytes([*question_count.first()?, *question_count.get(1)?]);
    // Unparsable questions are echoed whole, as a captive responder has nothing better to say.
    let question_len = question_section_len(qdcount, body).unwrap_or(body.len());
    let question = body.get(..question_len)?;

    let mut writer = ResponseWriter::new(response);
    writer.put(transaction_id)?;
    writer.put(&RESPONSE_FLAGS)?;
    writer.put(question_count)?;
    writer.put(&1u16.to_be_bytes())?; // answers
    writer.put(&0u16.to_be_bytes())?; // authority
    writer.put(&0u16.to_be_bytes())?; // additional
    writer.put(question)?;

    writer.put(&[0xC0, 0x0C])?; // pointer to the first question name
    writer.put(&1u16.to_be_bytes())?; // type A
    writer.put(&1u16.to_be_bytes())?; // class IN
    writer.put(&ANSWER_TTL_SECONDS.to_be_bytes())?;
    writer.put(&4u16.to_be_bytes())?;
    writer.put(&answer_ip)?;

    debug_assert_eq!(writer.len(), DNS_HEADER_LEN + question_len + ANSWER_LEN);
    Some(writer.len())
}

/// Walk `qdcount` questions and return how many bytes of `body` they occupy.
fn question_section_len(qdcount: u16, body: &[u8]) -> Option<usize> {
    let mut pos = 0usize;
    for _ in 0..qdcount {
        loop {
            let label_len = *body.get(pos)?;
            pos = pos.checked_add(1)?;
            match label_len {
                0 => break,
                // A compression pointer ends the name after its second byte.
                len if len & 0xC0 == 0xC0 => {
                    body.get(pos)?;
                    pos = pos.checked_add(1)?;
                    break;
                }
                len if len & 0xC0 != 0 => return None,
                len => pos = pos.checked_add(usize::from(len))?,
            }
        }
        // QTYPE + QCLASS
        pos = pos.checked_add(4)?;
        if pos > body.len() {
            return None;
        }
    }
    Some(pos)
}

struct ResponseWriter<'a> {
    buffer: &'a mut [u8],
    pos: usize,
}

impl<'a> ResponseWriter<'a> {
    const fn new(buffer: &'a mut [u8]) -> Self {
        Self { buffer, pos: 0 }
    }

    fn put(&mut self, bytes: &[u8]) -> Option<()> {
        let end = self.pos.checked_add(bytes.len())?;
        self.buffer.get_mut(self.pos..end)?.copy_from_slice(bytes);
        self.pos = end;
        Some(())
    }

    const fn len(&self) -> usize {
        self.pos
    }
}

#[cfg(feature = "wifi")]
pub use task::dns_server_task;

#[cfg(feature = "wifi")]
mod task {
    use defmt::{debug, error, info, warn};
    use embassy_net::{
        Ipv4Address, Stack,
        udp::{self, UdpSocket},
    };

    use super::handle_query;
    use crate::shared_constants::{DNS_DATAGRAM_LEN, DNS_PORT};

    /// DNS server task - answers every query with the access point's address.
    #[embassy_executor::task]
    pub async fn dns_server_task(stack: &'static Stack<'static>, answer_ip: Ipv4Address) -> ! {
        let mut rx_meta = [udp::PacketMetadata::EMPTY; 4];
        let mut rx_buffer = [0u8; DNS_DATAGRAM_LEN];
        let mut tx_meta = [udp::PacketMetadata::EMPTY; 4];
        let mut tx_buffer = [0u8; DNS_DATAGRAM_LEN];
        let mut socket = UdpSocket::new(
            *stack,
            &mut rx_meta,
            &mut rx_buffer,
            &mut tx_meta,
            &mut tx_buffer,
        );

        if let Err(err) = socket.bind(DNS_PORT) {
            error!("DNS server failed to bind: {:?}", err);
            core::panic!("Unable to bind DNS port");
        }

        info!("DNS server started - responding with {}", answer_ip);

        let octets = answer_ip.octets();
        let mut query = [0u8; DNS_DATAGRAM_LEN];
        let mut response = [0u8; DNS_DATAGRAM_LEN];

        loop {
            let (len, remote) = match socket.recv_from(&mut query).await {
                Ok(received) => received,
                Err(err) => {
                    warn!("DNS recv error: {:?}", err);
                    continue;
                }
            };

            let Some(response_len) = query
                .get(..len)
                .and_then(|datagram| handle_query(datagram, octets, &mut response))
            else {
                // Too short to be a DNS query, or no room for the answer.
                continue;
            };

            let Some(datagram) = response.get(..response_len) else {
                continue;
            };
            if let Err(err) = socket.send_to(datagram, remote).await {
                warn!("DNS send error: {:?}", err);
            } else {
                debug!("DNS query answered with {}", answer_ip);
            }
        }
    }
}
