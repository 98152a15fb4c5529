pub mod bluetooth;
pub mod bt_discovery;
pub mod memory;
pub mod rfcomm;
pub mod tcp;
pub mod traits;

pub use bluetooth::BluetoothTransport;
pub use bt_discovery::{AdapterDiscovery, DiscoveredPeer};
pub use rfcomm::{RfcommConfig, RfcommConnector, RfcommTransportStream};
pub use tcp::{TcpConfig, TcpConnector, TcpTransportStream};
pub use traits::{BoxedStream, Discovery, NoDiscovery, TransportConnector, TransportStream};
