// onionrelay core — three-hop onion routing over a relay directory
//
// A client picks three relays, wraps its request in one layer per relay and
// sends it to the first. Each relay peels its layer, learns only its neighbours
// and passes the rest on; replies come back wrapped once per hop.

pub mod app;
pub mod cell;
pub mod client;
pub mod crypto;
pub mod directory;
pub mod privacy;
pub mod relay;
pub mod transport;

pub use app::{AppRequest, ApplicationServer};
pub use cell::{decode_cell, encode_cell, CellType, OnionCell, RequestType};
pub use client::{ClientConfig, ClientError, OnionClient};
pub use crypto::{derive_keys, DerivedKeys, HeaderScheme, RelayIdentity, RelayPublicKey};
pub use directory::{Directory, FileDirectory, MemoryDirectory, RelayDescriptor};
pub use privacy::{select_route, CircuitHandle, CircuitParams, Route};
pub use relay::{RelayConfig, RelayContext, RelayEngine, RelayError, RelayService};
pub use transport::{LocalNetwork, RelayTransport, RequestHandler, RpcError, TcpTransport};
