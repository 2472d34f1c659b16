//! Rate Limiter - 요청 간 최소 딜레이 + 윈도우당 최대 요청 수

use std::time::{Duration, Instant};

/// Rate Limiter with minimum delay between requests
#[derive(Debug)]
pub struct RateLimiter {
    requests: Vec<Instant>,
    max_requests: u32,
    window: Duration,
    min_delay: Duration,
    last_request: Option<Instant>,
}

impl RateLimiter {
    pub fn new(max_requests: u32, window: Duration, min_delay: Duration) -> Self {
        Self {
            requests: Vec::new(),
            max_requests,
            window,
            min_delay,
            last_request: None,
        }
    }

    /// 요청 가능해질 때까지 대기 후 현재 요청 기록
    pub async fn acquire(&mut self) {
        if let Some(wait) = self.min_delay_wait() {
            tracing::debug!("Min delay: waiting {:?}", wait);
            tokio::time::sleep(wait).await;
        }

        if let Some(wait) = self.window_wait(Instant::now()) {
            tracing::debug!("Rate limit reached, waiting {:?}", wait);
            tokio::time::sleep(wait).await;
        }

        let now = Instant::now();
        self.requests.retain(|&t| now.duration_since(t) < self.window);
        self.requests.push(now);
        self.last_request = Some(now);
    }

    /// 버스트 방지용 최소 딜레이
    fn min_delay_wait(&self) -> Option<Duration> {
        let elapsed = self.last_request?.elapsed();
        (elapsed < self.min_delay).then(|| self.min_delay - elapsed)
    }

    /// 윈도우 한도 초과 시 가장 오래된 요청이 빠질 때까지의 시간
    fn window_wait(&mut self, now: Instant) -> Option<Duration> {
        self.requests.retain(|&t| now.duration_since(t) < self.window);
        if self.requests.len() < self.max_requests as usize {
            return None;
        }
        let oldest = *self.requests.first()?;
        let wait = self.window.saturating_sub(now.duration_since(oldest));
        (!wait.is_zero()).then_some(wait)
    }
}
