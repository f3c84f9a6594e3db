#[derive(Clone, Debug)]
pub struct RunTime {
    start: std::time::Instant,
    end: std::time::Instant,
}

impl RunTime {
    pub fn since_start(start: std::time::Instant) -> Self {
        Self {
            start,
            end: std::time::Instant::now(),
        }
    }
}

impl serde::Serialize for RunTime {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let duration = self.end - self.start;
        serializer.serialize_str(&format!("{}.{:03}s", duration.as_secs(), duration.subsec_millis()))
    }
}

#[derive(serde::Serialize, Clone, Debug)]
pub struct RunTimes {
    pub render_run_time: RunTime,
    pub write_run_time: Option<RunTime>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    #[test]
    fn test_serialize() -> anyhow::Result<()> {
        let start = Instant::now();
        let run_time = RunTime {
            start,
            end: start + Duration::from_millis(1042),
        };

        assert_eq!(serde_json::to_value(&run_time)?, serde_json::json!("1.042s"));

        Ok(())
    }
}
