//! [`GridPublisher`] – publishes display grids only when they change.
//!
//! Sources that rebuild the grid on a timer would otherwise flood the output
//! topic with identical frames.

use padrelay_middleware::Publisher;
use padrelay_types::{DisplayGrid, RelayError};
use tracing::debug;

pub struct GridPublisher {
    publisher: Publisher,
    last: Option<DisplayGrid>,
}

impl GridPublisher {
    pub fn new(publisher: Publisher) -> Self {
        Self {
            publisher,
            last: None,
        }
    }

    /// Publish `grid` unless it equals the last grid published.  Returns
    /// `true` when a message was sent.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Codec`] when the grid cannot be encoded; the
    /// grid is not remembered in that case.
    pub fn publish_if_changed(&mut self, grid: DisplayGrid) -> Result<bool, RelayError> {
        if self.last.as_ref() == Some(&grid) {
            return Ok(false);
        }
        self.publisher.publish_json(&grid)?;
        debug!(topic = self.publisher.topic(), columns = grid.0.len(), "grid published");
        self.last = Some(grid);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use padrelay_middleware::{InMemoryBus, MessageBus};
    use padrelay_types::Rgb;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn identical_grids_are_published_once() -> Result<(), Box<dyn std::error::Error>> {
        let bus = Arc::new(InMemoryBus::new());
        bus.create_topic("grid");
        bus.create_subscription("pad", "grid", Duration::from_secs(60)).await?;
        let mut grids = GridPublisher::new(Publisher::new(bus.clone(), "grid"));

        let mut grid = DisplayGrid::blank(8, 8);
        grid.set(0, 0, Rgb(0, 63, 0));
        assert!(grids.publish_if_changed(grid.clone())?);
        assert!(!grids.publish_if_changed(grid.clone())?);

        grid.set(0, 0, Rgb(63, 0, 0));
        assert!(grids.publish_if_changed(grid.clone())?);

        let mut received = Vec::new();
        while received.len() < 2 {
            for m in bus.pull("pad").await? {
                received.push(serde_json::from_slice::<DisplayGrid>(&m.data)?);
            }
        }
        assert!(received.contains(&grid));
        assert_eq!(received.len(), 2);
        Ok(())
    }
}
