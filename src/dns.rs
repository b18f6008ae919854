use std::net::IpAddr;

use anyhow::{anyhow, Result};
use hickory_proto::op::{Message, MessageType, Query, ResponseCode};
use hickory_proto::rr::{Name, RData, RecordType};

use crate::transport::ErrorKind;

/// DNS response information extracted from a parsed message
#[derive(Debug)]
pub struct DnsResponse {
	pub rcode: ResponseCode,
	/// A-record addresses from the answer section, in the order received
	pub addresses: Vec<IpAddr>,
}

impl DnsResponse {
	/// Turn a parsed reply into the resolved address list, or the failure
	/// kind recorded for it.
	pub fn classify(&self) -> std::result::Result<Vec<String>, ErrorKind> {
		match self.rcode {
			ResponseCode::NoError if self.addresses.is_empty() => Err(ErrorKind::NoAnswer),
			ResponseCode::NoError => {
				Ok(self.addresses.iter().map(|ip| ip.to_string()).collect())
			}
			ResponseCode::NXDomain => Err(ErrorKind::Nxdomain),
			ResponseCode::ServFail => Err(ErrorKind::Servfail),
			ResponseCode::Refused => Err(ErrorKind::Refused),
			_ => Err(ErrorKind::ErrorResponse),
		}
	}
}

/// Build an A query for the given domain with recursion desired.
///
/// Returns the serialized query bytes ready to send over UDP.
pub fn build_query(domain: &str, txid: u16) -> Result<Vec<u8>> {
	let name = Name::from_ascii(domain)
		.map_err(|e| anyhow!("invalid domain name '{}': {}", domain, e))?;

	let mut message = Message::new();
	message.set_id(txid);
	message.set_recursion_desired(true);
	message.add_query(Query::query(name, RecordType::A));

	let bytes = message.to_vec()
		.map_err(|e| anyhow!("failed to serialize DNS query: {}", e))?;
	Ok(bytes)
}

/// Parse a DNS response, validating the transaction ID and collecting A records.
///
/// Returns an error if the response cannot be parsed, is not a response,
/// or the txid does not match.
pub fn parse_response(bytes: &[u8], expected_txid: u16) -> Result<DnsResponse> {
	let message = Message::from_vec(bytes)
		.map_err(|e| anyhow!("failed to parse DNS response: {}", e))?;

	if message.id() != expected_txid {
		return Err(anyhow!(
			"txid mismatch: expected {}, got {}",
			expected_txid, message.id()
		));
	}

	if message.message_type() != MessageType::Response {
		return Err(anyhow!("received a query instead of a response"));
	}

	let addresses = message.answers().iter()
		.filter_map(|record| match record.data() {
			RData::A(a) => Some(IpAddr::V4(a.0)),
			_ => None,
		})
		.collect();

	Ok(DnsResponse {
		rcode: message.response_code(),
		addresses,
	})
}

/// Answer a wire-format query the way a test server would.
#[cfg(test)]
pub fn answer_query(
	query_bytes: &[u8],
	rcode: ResponseCode,
	addresses: &[std::net::Ipv4Addr],
) -> Vec<u8> {
	use hickory_proto::rr::rdata::A;
	use hickory_proto::rr::Record;

	let mut response = Message::from_vec(query_bytes).unwrap();
	response.set_message_type(MessageType::Response);
	response.set_response_code(rcode);
	let name = response.queries()[0].name().clone();
	for addr in addresses {
		response.add_answer(Record::from_rdata(name.clone(), 60, RData::A(A(*addr))));
	}
	response.to_vec().unwrap()
}
