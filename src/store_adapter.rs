use crate::error::Error;

/// Content-addressed byte map. Keys are binary digest bytes; implementations
/// that need text keys hex-encode internally, an implementation detail
/// never visible to callers.
pub trait StorageAdapter {
    fn put(&mut self, key: &[u8], value: &[u8]) -> Result<(), Error>;

    fn get(&mut self, key: &[u8]) -> Result<Vec<u8>, Error>;

    fn has(&mut self, key: &[u8]) -> bool;

    fn batch_put(&mut self, pairs: &[(Vec<u8>, Vec<u8>)]) -> Result<(), Error> {
        for (key, value) in pairs {
            self.put(key, value)?;
        }
        Ok(())
    }

    fn close(&mut self) -> Result<(), Error> {
        Ok(())
    }
}
