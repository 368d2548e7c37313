pub mod mock_encryption_server;
