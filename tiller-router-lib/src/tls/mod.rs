pub mod keypair;
pub mod resolver;
pub mod setup;

pub use keypair::parse_keypair;
pub use resolver::RouteCertResolver;
pub use setup::build_tls_acceptor;
