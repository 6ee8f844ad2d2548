use std::collections::VecDeque;

use crate::types::Point3;

/// The most recent positions of one tracked hand, oldest first.
#[derive(Clone, Debug)]
pub struct Trail {
    points: VecDeque<Point3>,
    capacity: usize,
}

impl Trail {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            points: VecDeque::with_capacity(capacity + 1),
            capacity,
        }
    }

    pub fn push(&mut self, point: Point3) {
        self.points.push_back(point);
        while self.points.len() > self.capacity {
            self.points.pop_front();
        }
    }

    pub fn clear(&mut self) {
        self.points.clear();
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn iter(&self) -> impl Iterator<Item = &Point3> {
        self.points.iter()
    }

    pub fn newest(&self) -> Option<&Point3> {
        self.points.back()
    }

    pub fn oldest(&self) -> Option<&Point3> {
        self.points.front()
    }
}
